//! Request Classifier & Strategy Router
//!
//! Every request is classified once into a `RequestCategory`; the router
//! hands back the matching `CacheStrategy`, which decides the workload
//! profile, the TTL class, what payload to store and how a hit is shaped
//! into a response.
//!
//! ```text
//!   request ──► RequestClassifier ──► StrategyRouter
//!                                         │
//!           ┌──────────────┬──────────────┼──────────────┐
//!           ▼              ▼              ▼              ▼
//!      FileStrategy   ApiStrategy   StaticStrategy  GenericStrategy
//!           │              │              │              │
//!           └──────── resolve / store via TieredCache ───┘
//! ```

pub mod api;
pub mod classifier;
pub mod file;
pub mod generic;
pub mod static_assets;

pub use api::ApiStrategy;
pub use classifier::{ClassifierConfig, RequestCategory, RequestClassifier};
pub use file::FileStrategy;
pub use generic::GenericStrategy;
pub use static_assets::StaticStrategy;

use crate::cache::entry::{CacheEntry, CacheKey, CachedPayload};
use crate::cache::policy::{CacheDecision, EndpointClass, SkipReason, TtlPolicy};
use crate::cache::tier::{CacheTier, WorkloadProfile};
use crate::cache::{CacheLookupResult, TieredCache};
use crate::optimizer::TuningKnobs;
use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode, Uri};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Strategy Inputs & Outputs
// =============================================================================

/// Borrowed view of the parts of a request that caching looks at
#[derive(Debug, Clone, Copy)]
pub struct RequestInfo<'a> {
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
}

impl<'a> RequestInfo<'a> {
    pub fn new(method: &'a Method, uri: &'a Uri, headers: &'a HeaderMap) -> Self {
        Self { method, uri, headers }
    }

    pub fn from_request<B>(request: &'a Request<B>) -> Self {
        Self::new(request.method(), request.uri(), request.headers())
    }

    pub fn path(&self) -> &'a str {
        self.uri.path()
    }
}

/// Shared collaborators a strategy works against
#[derive(Clone, Copy)]
pub struct StrategyContext<'a> {
    pub cache: &'a TieredCache,
    pub policy: &'a TtlPolicy,
    pub knobs: &'a TuningKnobs,
}

/// A response served from the cache
#[derive(Debug)]
pub struct CacheHit {
    pub response: Response<Bytes>,
    pub tier: CacheTier,
    pub age_secs: u64,
}

/// Result of offering a fresh response to the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored { ttl_secs: u64, tiers: Vec<CacheTier> },
    Skipped(SkipReason),
}

impl StoreOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, StoreOutcome::Stored { .. })
    }
}

// =============================================================================
// Strategy Trait
// =============================================================================

/// Per-category caching behavior
#[async_trait]
pub trait Strategy: Send + Sync {
    fn category(&self) -> RequestCategory;

    /// Tiers this request may use
    fn profile(&self, _request: &RequestInfo<'_>) -> WorkloadProfile {
        WorkloadProfile::Standard
    }

    /// TTL class for a response to this request
    fn endpoint_class(&self, request: &RequestInfo<'_>, response_headers: &HeaderMap) -> EndpointClass;

    /// Payload to store, or the reason to decline
    ///
    /// Called only after the TTL policy accepted the response; `explicit`
    /// is set when the origin sent its own lifetime.
    fn payload(
        &self,
        ctx: &StrategyContext<'_>,
        request: &RequestInfo<'_>,
        response: &Response<Bytes>,
        explicit: bool,
    ) -> Result<CachedPayload, SkipReason>;

    /// Shape a cached entry into the response served on a hit
    fn hit_response(&self, _request: &RequestInfo<'_>, entry: &CacheEntry, _now: DateTime<Utc>) -> Response<Bytes> {
        entry_response(entry)
    }

    /// Look the request up in the cache
    async fn resolve(&self, ctx: &StrategyContext<'_>, key: &CacheKey, request: &RequestInfo<'_>) -> Option<CacheHit> {
        match ctx.cache.resolve(key, self.profile(request)).await {
            CacheLookupResult::Hit { entry, tier, .. } => {
                let now = Utc::now();
                Some(CacheHit {
                    response: self.hit_response(request, &entry, now),
                    tier,
                    age_secs: entry.age_secs(now),
                })
            }
            CacheLookupResult::Miss => None,
        }
    }

    /// Offer a fresh response to the cache
    fn store(
        &self,
        ctx: &StrategyContext<'_>,
        key: &CacheKey,
        request: &RequestInfo<'_>,
        response: &Response<Bytes>,
    ) -> StoreOutcome {
        let class = self.endpoint_class(request, response.headers());
        let decision = ctx.policy.decide(
            class,
            response.status().as_u16(),
            response.headers(),
            response.body().len(),
            ctx.knobs.ttl_multiplier(),
        );
        let (ttl_secs, explicit) = match decision {
            CacheDecision::Store { ttl_secs, explicit } => (ttl_secs, explicit),
            CacheDecision::Skip(reason) => {
                ctx.cache.record_skip(key, &reason);
                return StoreOutcome::Skipped(reason);
            }
        };

        let payload = match self.payload(ctx, request, response, explicit) {
            Ok(payload) => payload,
            Err(reason) => {
                ctx.cache.record_skip(key, &reason);
                return StoreOutcome::Skipped(reason);
            }
        };

        let entry = CacheEntry::new(payload, response.status().as_u16(), ttl_secs)
            .with_headers(replayable_headers(response.headers()));
        let tiers = ctx.cache.store(key, &entry, self.profile(request));
        StoreOutcome::Stored { ttl_secs, tiers }
    }
}

// =============================================================================
// Cache Strategy
// =============================================================================

/// Strategy chosen for a request
pub enum CacheStrategy {
    File(FileStrategy),
    Api(ApiStrategy),
    Static(StaticStrategy),
    Generic(GenericStrategy),
}

impl CacheStrategy {
    pub fn as_strategy(&self) -> &dyn Strategy {
        match self {
            CacheStrategy::File(s) => s,
            CacheStrategy::Api(s) => s,
            CacheStrategy::Static(s) => s,
            CacheStrategy::Generic(s) => s,
        }
    }

    pub fn category(&self) -> RequestCategory {
        self.as_strategy().category()
    }

    /// Key namespace
    pub fn namespace(&self) -> &'static str {
        self.category().namespace()
    }
}

/// Strategy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub classifier: ClassifierConfig,
    /// Last path segments that mark file bytes rather than metadata
    pub content_subresources: Vec<String>,
    /// Path segments that mark metrics and analytics endpoints
    pub metrics_segments: Vec<String>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierConfig::default(),
            content_subresources: vec!["download".to_string(), "content".to_string()],
            metrics_segments: vec!["metrics".to_string(), "analytics".to_string()],
        }
    }
}

/// Picks the strategy for each request
pub struct StrategyRouter {
    classifier: RequestClassifier,
    file: CacheStrategy,
    api: CacheStrategy,
    static_assets: CacheStrategy,
    generic: CacheStrategy,
}

impl Default for StrategyRouter {
    fn default() -> Self {
        Self::with_config(StrategyConfig::default())
    }
}

impl StrategyRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: StrategyConfig) -> Self {
        Self {
            classifier: RequestClassifier::with_config(config.classifier),
            file: CacheStrategy::File(FileStrategy::new(config.content_subresources)),
            api: CacheStrategy::Api(ApiStrategy::new(config.metrics_segments)),
            static_assets: CacheStrategy::Static(StaticStrategy),
            generic: CacheStrategy::Generic(GenericStrategy),
        }
    }

    pub fn classifier(&self) -> &RequestClassifier {
        &self.classifier
    }

    /// Strategy for a request path
    pub fn route(&self, path: &str) -> &CacheStrategy {
        self.strategy(self.classifier.classify(path))
    }

    pub fn strategy(&self, category: RequestCategory) -> &CacheStrategy {
        match category {
            RequestCategory::File => &self.file,
            RequestCategory::Api => &self.api,
            RequestCategory::Static => &self.static_assets,
            RequestCategory::Generic => &self.generic,
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Headers never replayed from the cache
const UNREPLAYABLE_HEADERS: &[&str] = &[
    "age",
    "connection",
    "content-length",
    "date",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "set-cookie",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Response headers worth storing with an entry (lowercase names)
pub fn replayable_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| {
            let name = name.as_str();
            !UNREPLAYABLE_HEADERS.contains(&name) && !name.starts_with("x-cache")
        })
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
        .collect()
}

/// Rebuild a response from a cached entry
pub fn entry_response(entry: &CacheEntry) -> Response<Bytes> {
    let mut response = Response::new(entry.body().clone());
    *response.status_mut() = StatusCode::from_u16(entry.status).unwrap_or(StatusCode::OK);
    let headers = response.headers_mut();
    for (name, value) in &entry.headers {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
            headers.append(name, value);
        }
    }
    response
}

/// Media type of a `Content-Type` header, lowercased, without parameters
pub fn media_type(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
    let media = raw.split(';').next()?.trim().to_ascii_lowercase();
    (!media.is_empty()).then_some(media)
}

pub fn is_json_media(media: &str) -> bool {
    media == "application/json" || media.ends_with("+json")
}

pub fn is_html_media(media: &str) -> bool {
    media == "text/html" || media == "application/xhtml+xml"
}

/// Validate a JSON body, keeping the raw bytes
pub fn json_payload(body: &Bytes) -> Result<CachedPayload, SkipReason> {
    serde_json::from_slice::<serde::de::IgnoredAny>(body)
        .map(|_| CachedPayload::Json(body.clone()))
        .map_err(|_| SkipReason::InvalidPayload)
}
