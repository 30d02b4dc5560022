//! TTL & Eligibility Policy
//!
//! Decides whether a response may be stored and for how long.
//!
//! TTL precedence:
//! 1. explicit response directive (`s-maxage` over `max-age`)
//! 2. endpoint-class default, scaled by the optimizer's TTL multiplier
//! 3. global default
//!
//! Every TTL is clamped to `[1, max_ttl_secs]`.

use crate::error::Error;
use axum::http::{header, HeaderMap};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default upper bound on any TTL (1 day)
pub const DEFAULT_MAX_TTL_SECS: u64 = 86_400;

/// Default largest cacheable body (16MB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

// =============================================================================
// Endpoint Class
// =============================================================================

/// Content class used to pick a default TTL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointClass {
    /// Metrics / analytics endpoints
    Metrics,
    /// File listings and metadata
    FileMetadata,
    /// File bytes (downloads, content)
    FileContent,
    /// Versioned static assets
    Static,
    /// Generic JSON responses
    Structured,
    /// HTML documents
    Document,
    /// Anything else
    Default,
}

impl fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EndpointClass::Metrics => "metrics",
            EndpointClass::FileMetadata => "file_metadata",
            EndpointClass::FileContent => "file_content",
            EndpointClass::Static => "static",
            EndpointClass::Structured => "structured",
            EndpointClass::Document => "document",
            EndpointClass::Default => "default",
        };
        f.write_str(s)
    }
}

/// Default TTLs per endpoint class (seconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlDefaults {
    pub metrics: u64,
    pub file_metadata: u64,
    pub file_content: u64,
    pub static_assets: u64,
    pub structured: u64,
    pub document: u64,
    pub global: u64,
}

impl Default for TtlDefaults {
    fn default() -> Self {
        Self {
            metrics: 60,
            file_metadata: 600,
            file_content: 1800,
            static_assets: 86_400,
            structured: 300,
            document: 180,
            global: 300,
        }
    }
}

impl TtlDefaults {
    /// Default TTL for a class
    pub fn for_class(&self, class: EndpointClass) -> u64 {
        match class {
            EndpointClass::Metrics => self.metrics,
            EndpointClass::FileMetadata => self.file_metadata,
            EndpointClass::FileContent => self.file_content,
            EndpointClass::Static => self.static_assets,
            EndpointClass::Structured => self.structured,
            EndpointClass::Document => self.document,
            EndpointClass::Default => self.global,
        }
    }
}

/// Policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub ttl: TtlDefaults,
    pub max_ttl_secs: u64,
    /// Bodies strictly larger than this are never stored
    pub max_body_bytes: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            ttl: TtlDefaults::default(),
            max_ttl_secs: DEFAULT_MAX_TTL_SECS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

// =============================================================================
// Cache-Control Parsing
// =============================================================================

/// Parsed `Cache-Control` directives relevant to storage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub no_store: bool,
    pub no_cache: bool,
    pub private: bool,
    pub public: bool,
    pub immutable: bool,
    pub max_age: Option<u64>,
    pub s_maxage: Option<u64>,
}

impl CacheControl {
    /// Parse every `Cache-Control` header in a map
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut cc = CacheControl::default();
        for value in headers.get_all(header::CACHE_CONTROL) {
            if let Ok(value) = value.to_str() {
                cc.merge(value);
            }
        }
        cc
    }

    /// Parse a single header value
    pub fn parse(value: &str) -> Self {
        let mut cc = CacheControl::default();
        cc.merge(value);
        cc
    }

    fn merge(&mut self, value: &str) {
        for directive in value.split(',') {
            let directive = directive.trim();
            let (name, arg) = match directive.split_once('=') {
                Some((n, a)) => (n.trim(), Some(a.trim().trim_matches('"'))),
                None => (directive, None),
            };
            match name.to_ascii_lowercase().as_str() {
                "no-store" => self.no_store = true,
                "no-cache" => self.no_cache = true,
                "private" => self.private = true,
                "public" => self.public = true,
                "immutable" => self.immutable = true,
                "max-age" => self.max_age = arg.and_then(|a| a.parse().ok()),
                "s-maxage" => self.s_maxage = arg.and_then(|a| a.parse().ok()),
                _ => {}
            }
        }
    }

    /// Whether the directives forbid storing the response
    pub fn forbids_storage(&self) -> bool {
        self.no_store || self.no_cache || self.private
    }

    /// The explicit lifetime, shared caches first
    pub fn explicit_ttl(&self) -> Option<u64> {
        self.s_maxage.or(self.max_age)
    }
}

/// Whether request headers ask to skip the cache entirely
pub fn request_bypasses_cache(headers: &HeaderMap) -> bool {
    let cc = CacheControl::from_headers(headers);
    if cc.no_cache || cc.no_store {
        return true;
    }
    headers
        .get_all(header::PRAGMA)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.to_ascii_lowercase().contains("no-cache"))
}

// =============================================================================
// Decision
// =============================================================================

/// Why a response was not stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Status >= 400
    ErrorStatus(u16),
    /// 1xx, 206, 304
    UncacheableStatus(u16),
    /// Response establishes a session
    SetsCookie,
    /// `no-store`, `no-cache` or `private`
    Forbidden,
    /// Explicit `max-age=0`
    ZeroLifetime,
    /// Body above `max_body_bytes`
    TooLarge { size: usize, limit: usize },
    /// Request asked to bypass the cache
    RequestBypass,
    /// Strategy declined the content type
    NotEligible,
    /// Structured endpoint returned a body that is not JSON
    InvalidPayload,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ErrorStatus(s) => write!(f, "error status {}", s),
            SkipReason::UncacheableStatus(s) => write!(f, "uncacheable status {}", s),
            SkipReason::SetsCookie => write!(f, "response sets a cookie"),
            SkipReason::Forbidden => write!(f, "cache-control forbids storage"),
            SkipReason::ZeroLifetime => write!(f, "explicit zero lifetime"),
            SkipReason::TooLarge { size, limit } => write!(f, "body of {} bytes exceeds {}", size, limit),
            SkipReason::RequestBypass => write!(f, "request bypassed cache"),
            SkipReason::NotEligible => write!(f, "content not eligible"),
            SkipReason::InvalidPayload => write!(f, "payload is not valid JSON"),
        }
    }
}

impl SkipReason {
    /// Short label for metrics and events
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::ErrorStatus(_) => "error_status",
            SkipReason::UncacheableStatus(_) => "uncacheable_status",
            SkipReason::SetsCookie => "set_cookie",
            SkipReason::Forbidden => "forbidden",
            SkipReason::ZeroLifetime => "zero_lifetime",
            SkipReason::TooLarge { .. } => "too_large",
            SkipReason::RequestBypass => "request_bypass",
            SkipReason::NotEligible => "not_eligible",
            SkipReason::InvalidPayload => "invalid_payload",
        }
    }

    /// Convert to the policy error for a key
    pub fn into_error(self, key: &str) -> Error {
        Error::PolicyViolation {
            key: key.to_string(),
            reason: self.to_string(),
        }
    }
}

/// Outcome of evaluating a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheDecision {
    Store { ttl_secs: u64, explicit: bool },
    Skip(SkipReason),
}

impl CacheDecision {
    pub fn ttl_secs(&self) -> Option<u64> {
        match self {
            CacheDecision::Store { ttl_secs, .. } => Some(*ttl_secs),
            CacheDecision::Skip(_) => None,
        }
    }

    pub fn is_store(&self) -> bool {
        matches!(self, CacheDecision::Store { .. })
    }
}

// =============================================================================
// TTL Policy
// =============================================================================

/// TTL and eligibility evaluation
#[derive(Debug, Clone, Default)]
pub struct TtlPolicy {
    config: PolicyConfig,
}

impl TtlPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn max_ttl_secs(&self) -> u64 {
        self.config.max_ttl_secs.max(1)
    }

    /// Whether a status code may ever be stored
    pub fn check_status(status: u16) -> Result<(), SkipReason> {
        if status >= 400 {
            return Err(SkipReason::ErrorStatus(status));
        }
        if status < 200 || status == 206 || status == 304 {
            return Err(SkipReason::UncacheableStatus(status));
        }
        Ok(())
    }

    /// Evaluate a response
    ///
    /// `multiplier` scales class defaults only; explicit directives are honored
    /// as sent (still clamped).
    pub fn decide(
        &self,
        class: EndpointClass,
        status: u16,
        headers: &HeaderMap,
        body_len: usize,
        multiplier: f64,
    ) -> CacheDecision {
        if let Err(reason) = Self::check_status(status) {
            return CacheDecision::Skip(reason);
        }
        if headers.contains_key(header::SET_COOKIE) {
            return CacheDecision::Skip(SkipReason::SetsCookie);
        }

        let cc = CacheControl::from_headers(headers);
        if cc.forbids_storage() {
            return CacheDecision::Skip(SkipReason::Forbidden);
        }
        if body_len > self.config.max_body_bytes {
            return CacheDecision::Skip(SkipReason::TooLarge {
                size: body_len,
                limit: self.config.max_body_bytes,
            });
        }

        match cc.explicit_ttl() {
            Some(0) => CacheDecision::Skip(SkipReason::ZeroLifetime),
            Some(ttl) => CacheDecision::Store {
                ttl_secs: self.clamp(ttl),
                explicit: true,
            },
            None => CacheDecision::Store {
                ttl_secs: self.class_ttl(class, multiplier),
                explicit: false,
            },
        }
    }

    /// Class default scaled by `multiplier`, clamped
    pub fn class_ttl(&self, class: EndpointClass, multiplier: f64) -> u64 {
        let base = self.config.ttl.for_class(class) as f64;
        let multiplier = if multiplier.is_finite() && multiplier > 0.0 { multiplier } else { 1.0 };
        self.clamp((base * multiplier).round() as u64)
    }

    fn clamp(&self, ttl: u64) -> u64 {
        ttl.clamp(1, self.max_ttl_secs())
    }
}
