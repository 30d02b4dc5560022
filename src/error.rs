//! Error types for the tiered response cache
//!
//! The cache layer never surfaces its own failures to clients. Every variant
//! carries a disposition describing how the request path degrades when it
//! occurs: fall through to the next tier, evict and miss, bypass caching for
//! the request, or silently skip a store.

use crate::cache::tier::CacheTier;
use thiserror::Error;

/// Unified error type for the cache layer
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Tier Errors
    // =========================================================================
    #[error("Tier {tier} unavailable during {operation}: {reason}")]
    TierUnavailable {
        tier: CacheTier,
        operation: &'static str,
        reason: String,
    },

    #[error("Tier {tier} timed out during {operation} after {timeout_ms}ms")]
    TierTimeout {
        tier: CacheTier,
        operation: &'static str,
        timeout_ms: u64,
    },

    // =========================================================================
    // Payload Errors
    // =========================================================================
    #[error("Stored payload for {key} is undecodable: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Compression error: {0}")]
    Compression(String),

    // =========================================================================
    // Key & Policy Errors
    // =========================================================================
    #[error("Cache key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Response for {key} is not cacheable: {reason}")]
    PolicyViolation { key: String, reason: String },

    #[error("Invalid invalidation pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    // =========================================================================
    // Upstream Errors
    // =========================================================================
    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("Upstream connection error: {0}")]
    UpstreamConnection(#[from] reqwest::Error),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Parse / IO Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How the request path degrades when an error occurs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// Treat the failing tier as a miss and continue with the next one
    DegradeToMiss,
    /// Treat as a miss and evict the offending entry
    EvictAndMiss,
    /// Skip caching for this request entirely
    BypassCache,
    /// Do not store the response; not visible to the caller
    SkipStore,
    /// Report to the operator (management API, startup)
    Report,
}

impl Error {
    /// Determine how the request path handles this error
    pub fn disposition(&self) -> ErrorDisposition {
        match self {
            Error::TierUnavailable { .. } | Error::TierTimeout { .. } | Error::Io(_) => {
                ErrorDisposition::DegradeToMiss
            }

            Error::Serialization { .. } | Error::Compression(_) => ErrorDisposition::EvictAndMiss,

            Error::KeyGeneration(_) => ErrorDisposition::BypassCache,

            Error::PolicyViolation { .. } => ErrorDisposition::SkipStore,

            Error::InvalidPattern { .. }
            | Error::Configuration(_)
            | Error::Upstream(_)
            | Error::UpstreamConnection(_)
            | Error::Internal(_)
            | Error::JsonParse(_)
            | Error::YamlParse(_) => ErrorDisposition::Report,
        }
    }

    /// Check if this error is transient (worth retrying at the tier level)
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::TierUnavailable { .. } | Error::TierTimeout { .. } | Error::UpstreamConnection(_)
        )
    }

    /// Tier associated with this error, if any
    pub fn tier(&self) -> Option<CacheTier> {
        match self {
            Error::TierUnavailable { tier, .. } | Error::TierTimeout { tier, .. } => Some(*tier),
            _ => None,
        }
    }

    /// Shorthand for a tier I/O failure
    pub fn tier_unavailable(tier: CacheTier, operation: &'static str, reason: impl Into<String>) -> Self {
        Error::TierUnavailable {
            tier,
            operation,
            reason: reason.into(),
        }
    }

    /// Shorthand for an undecodable payload
    pub fn serialization(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Serialization {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for the cache layer
pub type Result<T> = std::result::Result<T, Error>;
