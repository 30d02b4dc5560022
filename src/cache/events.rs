//! Cache Events
//!
//! Events broadcast by the cache for monitoring and tests.

use crate::cache::entry::CacheKey;
use crate::cache::tier::CacheTier;
use serde::Serialize;

/// Events emitted by the cache system
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CacheEvent {
    /// Lookup answered by a tier
    Hit { key: String, tier: CacheTier },

    /// Lookup answered by no tier
    Miss { key: String },

    /// Request skipped the cache
    Bypass { path: String, reason: String },

    /// Response accepted for storage
    Stored {
        key: String,
        ttl_secs: u64,
        size_bytes: u64,
    },

    /// Response rejected by policy
    Skipped { key: String, reason: String },

    /// Faster tier filled after a slower-tier hit
    Populated {
        key: String,
        from_tier: CacheTier,
        to_tier: CacheTier,
    },

    /// Entry dropped from a tier (expired, invalidated, undecodable)
    Evicted {
        key: String,
        tier: CacheTier,
        reason: EvictionReason,
    },

    /// Invalidation applied
    Invalidated { scope: String, removed: u64 },

    /// Tier call failed or timed out
    TierError {
        tier: CacheTier,
        operation: String,
        error: String,
    },

    /// Optimizer changed mode
    Tuned { mode: String, reason: String },
}

/// Reason an entry was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    Expired,
    Invalidated,
    Corrupted,
}

impl std::fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvictionReason::Expired => write!(f, "expired"),
            EvictionReason::Invalidated => write!(f, "invalidated"),
            EvictionReason::Corrupted => write!(f, "corrupted"),
        }
    }
}

impl CacheEvent {
    pub fn hit(key: &CacheKey, tier: CacheTier) -> Self {
        CacheEvent::Hit {
            key: key.to_string(),
            tier,
        }
    }

    pub fn miss(key: &CacheKey) -> Self {
        CacheEvent::Miss { key: key.to_string() }
    }

    pub fn evicted(key: &CacheKey, tier: CacheTier, reason: EvictionReason) -> Self {
        CacheEvent::Evicted {
            key: key.to_string(),
            tier,
            reason,
        }
    }

    pub fn populated(key: &CacheKey, from_tier: CacheTier, to_tier: CacheTier) -> Self {
        CacheEvent::Populated {
            key: key.to_string(),
            from_tier,
            to_tier,
        }
    }

    /// Key associated with this event (if any)
    pub fn key(&self) -> Option<&str> {
        match self {
            CacheEvent::Hit { key, .. }
            | CacheEvent::Miss { key }
            | CacheEvent::Stored { key, .. }
            | CacheEvent::Skipped { key, .. }
            | CacheEvent::Populated { key, .. }
            | CacheEvent::Evicted { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Tier associated with this event (if any)
    pub fn tier(&self) -> Option<CacheTier> {
        match self {
            CacheEvent::Hit { tier, .. } | CacheEvent::Evicted { tier, .. } | CacheEvent::TierError { tier, .. } => {
                Some(*tier)
            }
            CacheEvent::Populated { to_tier, .. } => Some(*to_tier),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CacheEvent::TierError { .. })
    }
}
