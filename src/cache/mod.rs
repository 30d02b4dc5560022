//! Multi-Tier Response Cache
//!
//! Three tiers of increasing latency and durability:
//! - **Memory**: process-local LRU, bounded by entry count
//! - **Edge**: network-local CDN cache, consumed through `EdgeCache`
//! - **Durable**: distributed key-value store, consumed through `KvStore`
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            TieredCache                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │   resolve ──► Memory ──miss──► Edge ──miss──► Durable ──miss──► Miss    │
//! │                 ▲               │  ▲             │                       │
//! │                 └──── populate ─┘  └─ populate ──┘ (memory inline,       │
//! │                                                     edge detached)       │
//! │   store   ──► Memory (inline) + Edge, Durable (TaskTracker)              │
//! │   invalidate ─► marker + Memory + Durable (awaited) + Edge (detached)    │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  KeyDeriver (deterministic keys)   TtlPolicy (eligibility + TTL)         │
//! │  InvalidationLedger (markers)      CacheMetrics (cache-line aligned)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use tiered_response_cache::cache::{TieredCache, TieredCacheConfig, WorkloadProfile};
//!
//! let cache = TieredCache::in_memory(TieredCacheConfig::default());
//! cache.store(&key, &entry, WorkloadProfile::Standard);
//!
//! match cache.resolve(&key, WorkloadProfile::Standard).await {
//!     CacheLookupResult::Hit { entry, tier, .. } => println!("hit in {}", tier),
//!     CacheLookupResult::Miss => println!("miss"),
//! }
//! ```

pub mod compression;
pub mod entry;
pub mod events;
pub mod invalidation;
pub mod keys;
pub mod metrics;
pub mod orchestrator;
pub mod policy;
pub mod storage;
pub mod tier;

pub use compression::{CompressionConfig, CompressionManager};
pub use entry::{CacheEntry, CacheKey, CachedPayload, CompressionAlgorithm, PayloadKind};
pub use events::{CacheEvent, EvictionReason};
pub use invalidation::{InvalidationLedger, InvalidationScope};
pub use keys::{KeyConfig, KeyDeriver};
pub use metrics::{CacheMetrics, CacheStatsSnapshot, TierRecord, TierRecordSnapshot};
pub use orchestrator::{InvalidationReport, TierHealth, TieredCache, TieredCacheConfig};
pub use policy::{CacheControl, CacheDecision, EndpointClass, PolicyConfig, SkipReason, TtlDefaults, TtlPolicy};
pub use storage::{
    DurableTier, EdgeCache, EdgeTier, FileKvStore, InMemoryEdgeCache, InMemoryKvStore, KvStore, MemoryTier,
    TierStorage,
};
pub use tier::{CacheTier, TierConfig, WorkloadProfile};

// =============================================================================
// Cache Lookup Result
// =============================================================================

/// Result of a cache lookup
#[derive(Debug, Clone)]
pub enum CacheLookupResult {
    /// Hit with the entry and the tier that answered
    Hit {
        entry: CacheEntry,
        tier: CacheTier,
        /// Faster tiers filled (or scheduled) from this hit
        populated: Vec<CacheTier>,
    },
    /// Not found (or not servable) in any tier
    Miss,
}

impl CacheLookupResult {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookupResult::Hit { .. })
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, CacheLookupResult::Miss)
    }

    pub fn entry(&self) -> Option<&CacheEntry> {
        match self {
            CacheLookupResult::Hit { entry, .. } => Some(entry),
            CacheLookupResult::Miss => None,
        }
    }

    pub fn tier(&self) -> Option<CacheTier> {
        match self {
            CacheLookupResult::Hit { tier, .. } => Some(*tier),
            CacheLookupResult::Miss => None,
        }
    }
}
