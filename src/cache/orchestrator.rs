//! Tiered Cache Orchestrator
//!
//! Coordinates the memory, edge and durable tiers:
//!
//! - `resolve` walks the tiers fastest-first, each call under its own
//!   timeout. Expired, invalidated and undecodable entries are misses and
//!   are evicted best-effort. A hit below the memory tier fills memory inline
//!   and the edge tier from a detached task.
//! - `store` writes memory inline and the slower tiers from detached tasks,
//!   so a fresh response is never held up by tier I/O.
//! - `invalidate` records a marker, clears memory, deletes from the durable
//!   tier synchronously and purges the edge best-effort.
//!
//! Detached tasks run under a `TaskTracker`; they outlive the request that
//! started them and their failures are only logged.

use crate::cache::entry::{CacheEntry, CacheKey};
use crate::cache::events::{CacheEvent, EvictionReason};
use crate::cache::invalidation::{InvalidationLedger, InvalidationScope};
use crate::cache::metrics::{CacheMetrics, CacheStatsSnapshot};
use crate::cache::policy::{SkipReason, DEFAULT_MAX_TTL_SECS};
use crate::cache::storage::{
    DurableTier, EdgeTier, InMemoryEdgeCache, InMemoryKvStore, MemoryTier, SharedTierStorage, TierStorage,
};
use crate::cache::tier::{CacheTier, TierConfig, WorkloadProfile};
use crate::cache::CacheLookupResult;
use crate::error::{Error, ErrorDisposition, Result};
use crate::optimizer::TuningKnobs;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TieredCacheConfig {
    pub memory: TierConfig,
    pub edge: TierConfig,
    pub durable: TierConfig,
    /// Lifetime of invalidation markers; must cover the longest TTL
    pub max_ttl_secs: u64,
    /// With durable hot-path writes disabled, entries below this TTL skip the durable tier
    pub durable_min_ttl_secs: u64,
    /// Budget for a durable invalidation (list + deletes)
    pub invalidation_timeout_ms: u64,
    /// Event channel capacity
    pub event_channel_capacity: usize,
}

impl Default for TieredCacheConfig {
    fn default() -> Self {
        Self {
            memory: TierConfig::memory_default(),
            edge: TierConfig::edge_default(),
            durable: TierConfig::durable_default(),
            max_ttl_secs: DEFAULT_MAX_TTL_SECS,
            durable_min_ttl_secs: 600,
            invalidation_timeout_ms: 5_000,
            event_channel_capacity: 1024,
        }
    }
}

impl TieredCacheConfig {
    /// Config for a tier
    pub fn tier(&self, tier: CacheTier) -> &TierConfig {
        match tier {
            CacheTier::Memory => &self.memory,
            CacheTier::Edge => &self.edge,
            CacheTier::Durable => &self.durable,
        }
    }
}

/// Result of an invalidation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvalidationReport {
    pub scope: String,
    pub memory_removed: u64,
    pub durable_removed: u64,
}

/// Health of one tier
#[derive(Debug, Clone, Serialize)]
pub struct TierHealth {
    pub tier: CacheTier,
    pub enabled: bool,
    pub healthy: bool,
    pub error: Option<String>,
}

// =============================================================================
// Tiered Cache
// =============================================================================

/// Three-tier read-through cache
pub struct TieredCache {
    memory: Arc<MemoryTier>,
    edge: Option<SharedTierStorage>,
    durable: Option<SharedTierStorage>,
    config: TieredCacheConfig,
    ledger: InvalidationLedger,
    knobs: Arc<TuningKnobs>,
    metrics: Arc<CacheMetrics>,
    tracker: TaskTracker,
    event_tx: broadcast::Sender<CacheEvent>,
}

impl TieredCache {
    /// Assemble a cache over explicit tier backends
    pub fn new(
        config: TieredCacheConfig,
        edge: Option<SharedTierStorage>,
        durable: Option<SharedTierStorage>,
        knobs: Arc<TuningKnobs>,
    ) -> Self {
        let memory = Arc::new(MemoryTier::with_capacity(config.memory.capacity_entries));
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));

        info!(
            memory_capacity = config.memory.capacity_entries,
            edge = edge.is_some() && config.edge.enabled,
            durable = durable.is_some() && config.durable.enabled,
            "Tiered cache initialized"
        );

        Self {
            memory,
            edge,
            durable,
            ledger: InvalidationLedger::new(config.max_ttl_secs),
            config,
            knobs,
            metrics: Arc::new(CacheMetrics::new()),
            tracker: TaskTracker::new(),
            event_tx,
        }
    }

    /// Cache with in-process edge and durable backends (dev, tests)
    pub fn in_memory(config: TieredCacheConfig) -> Self {
        let edge: SharedTierStorage = Arc::new(EdgeTier::new(Arc::new(InMemoryEdgeCache::new())));
        let durable: SharedTierStorage = Arc::new(DurableTier::new(Arc::new(InMemoryKvStore::new())));
        Self::new(config, Some(edge), Some(durable), Arc::new(TuningKnobs::default()))
    }

    /// Subscribe to cache events
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.event_tx.subscribe()
    }

    pub(crate) fn emit_event(&self, event: CacheEvent) {
        let _ = self.event_tx.send(event);
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &TieredCacheConfig {
        &self.config
    }

    /// Memory tier handle (capacity knob)
    pub fn memory(&self) -> &Arc<MemoryTier> {
        &self.memory
    }

    /// Storage for a tier, if present and enabled
    fn storage(&self, tier: CacheTier) -> Option<SharedTierStorage> {
        if !self.config.tier(tier).enabled {
            return None;
        }
        match tier {
            CacheTier::Memory => Some(self.memory.clone() as SharedTierStorage),
            CacheTier::Edge => self.edge.clone(),
            CacheTier::Durable => self.durable.clone(),
        }
    }

    // =========================================================================
    // Resolve
    // =========================================================================

    /// Look a key up across the tiers allowed by `profile`
    pub async fn resolve(&self, key: &CacheKey, profile: WorkloadProfile) -> CacheLookupResult {
        for &tier in CacheTier::lookup_order() {
            if !profile.uses(tier) {
                continue;
            }
            let storage = match self.storage(tier) {
                Some(storage) => storage,
                None => continue,
            };
            let record = self.metrics.tier(tier);
            let timeout = self.config.tier(tier).timeout();

            match timed(tier, "get", timeout, storage.get(key)).await {
                Ok(Some(entry)) => {
                    let now = Utc::now();
                    if entry.is_expired_at(now) {
                        record.record_miss();
                        self.evict(storage, key, EvictionReason::Expired);
                        continue;
                    }
                    if self.ledger.is_invalidated(key.as_str(), entry.created_at) {
                        record.record_miss();
                        self.evict(storage, key, EvictionReason::Invalidated);
                        continue;
                    }

                    record.record_hit();
                    self.metrics.record_hit();
                    self.emit_event(CacheEvent::hit(key, tier));
                    debug!(key = %key, tier = %tier, "Cache hit");

                    let populated = self.populate(key, &entry, tier, profile).await;
                    return CacheLookupResult::Hit { entry, tier, populated };
                }
                Ok(None) => record.record_miss(),
                Err(e) => {
                    report_tier_error(&self.metrics, &self.event_tx, tier, "get", key, &e);
                    if e.disposition() == ErrorDisposition::EvictAndMiss {
                        self.evict(storage, key, EvictionReason::Corrupted);
                    }
                }
            }
        }

        self.metrics.record_miss();
        self.emit_event(CacheEvent::miss(key));
        debug!(key = %key, "Cache miss");
        CacheLookupResult::Miss
    }

    /// Fill the tiers faster than `source`
    async fn populate(
        &self,
        key: &CacheKey,
        entry: &CacheEntry,
        source: CacheTier,
        profile: WorkloadProfile,
    ) -> Vec<CacheTier> {
        let mut populated = Vec::new();
        for &target in source.faster_tiers() {
            if !profile.uses(target) {
                continue;
            }
            let storage = match self.storage(target) {
                Some(storage) => storage,
                None => continue,
            };
            let ttl = self.config.tier(target).clamp_ttl(entry.ttl_secs);

            if target == CacheTier::Memory {
                // In-process, no I/O
                self.memory.insert(key.as_str(), entry.clamped(ttl));
                self.metrics.memory.record_write();
            } else {
                self.spawn_put(storage, target, key.clone(), entry.clone(), ttl);
            }

            self.metrics.record_population();
            self.emit_event(CacheEvent::populated(key, source, target));
            populated.push(target);
        }
        populated
    }

    /// Drop an entry from one tier without blocking the caller
    fn evict(&self, storage: SharedTierStorage, key: &CacheKey, reason: EvictionReason) {
        let tier = storage.tier();
        self.metrics.tier(tier).record_eviction();
        self.emit_event(CacheEvent::evicted(key, tier, reason));
        debug!(key = %key, tier = %tier, reason = %reason, "Evicting entry");

        if tier == CacheTier::Memory {
            self.memory.remove(key.as_str());
            return;
        }

        let key = key.clone();
        let timeout = self.config.tier(tier).timeout();
        let metrics = self.metrics.clone();
        let events = self.event_tx.clone();
        self.tracker.spawn(async move {
            if let Err(e) = timed(tier, "delete", timeout, storage.delete(&key)).await {
                report_tier_error(&metrics, &events, tier, "delete", &key, &e);
            }
        });
    }

    // =========================================================================
    // Store
    // =========================================================================

    /// Write an entry to every tier allowed by `profile`
    ///
    /// Returns the tiers written or scheduled.
    pub fn store(&self, key: &CacheKey, entry: &CacheEntry, profile: WorkloadProfile) -> Vec<CacheTier> {
        let mut targets = Vec::with_capacity(3);

        for &tier in CacheTier::lookup_order() {
            if !profile.uses(tier) {
                continue;
            }
            let storage = match self.storage(tier) {
                Some(storage) => storage,
                None => continue,
            };
            let ttl = self.config.tier(tier).clamp_ttl(entry.ttl_secs);

            match tier {
                CacheTier::Memory => {
                    self.memory.insert(key.as_str(), entry.clamped(ttl));
                    self.metrics.memory.record_write();
                }
                CacheTier::Durable
                    if !self.knobs.durable_hot_path_writes() && entry.ttl_secs < self.config.durable_min_ttl_secs =>
                {
                    debug!(key = %key, ttl_secs = entry.ttl_secs, "Skipping durable write for short-lived entry");
                    continue;
                }
                _ => self.spawn_put(storage, tier, key.clone(), entry.clone(), ttl),
            }
            targets.push(tier);
        }

        self.metrics.record_store();
        self.emit_event(CacheEvent::Stored {
            key: key.to_string(),
            ttl_secs: entry.ttl_secs,
            size_bytes: entry.size_bytes() as u64,
        });
        debug!(key = %key, ttl_secs = entry.ttl_secs, tiers = ?targets, "Stored entry");
        targets
    }

    /// Account for a response the policy declined to store
    pub fn record_skip(&self, key: &CacheKey, reason: &SkipReason) {
        self.metrics.record_skipped_store();
        self.emit_event(CacheEvent::Skipped {
            key: key.to_string(),
            reason: reason.label().to_string(),
        });
        debug!(key = %key, reason = %reason, "Response not stored");
    }

    /// Account for a request that skipped the cache
    pub fn record_bypass(&self, path: &str, reason: &str) {
        self.metrics.record_bypass();
        self.emit_event(CacheEvent::Bypass {
            path: path.to_string(),
            reason: reason.to_string(),
        });
        debug!(path, reason, "Cache bypassed");
    }

    fn spawn_put(&self, storage: SharedTierStorage, tier: CacheTier, key: CacheKey, entry: CacheEntry, ttl: u64) {
        let timeout = self.config.tier(tier).timeout();
        let metrics = self.metrics.clone();
        let events = self.event_tx.clone();
        self.tracker.spawn(async move {
            match timed(tier, "put", timeout, storage.put(&key, &entry, ttl)).await {
                Ok(()) => metrics.tier(tier).record_write(),
                Err(e) => report_tier_error(&metrics, &events, tier, "put", &key, &e),
            }
        });
    }

    // =========================================================================
    // Invalidate
    // =========================================================================

    /// Invalidate a key, prefix or pattern across all tiers
    ///
    /// The marker is recorded first, so no tier serves an older copy once
    /// this call starts. The durable delete is awaited; an error there is
    /// returned after the other tiers have been handled.
    pub async fn invalidate(&self, scope: &InvalidationScope) -> Result<InvalidationReport> {
        let now = Utc::now();
        self.ledger.purge_expired(now);
        self.ledger.record(scope, now);

        let memory_removed = match scope {
            InvalidationScope::Key(key) => self.memory.remove(key.as_str()) as u64,
            _ => self.memory.remove_matching(scope),
        };

        if let Some(edge) = self.storage(CacheTier::Edge) {
            let scope = scope.clone();
            let timeout = self.config.edge.timeout();
            let metrics = self.metrics.clone();
            let events = self.event_tx.clone();
            self.tracker.spawn(async move {
                if let Err(e) = timed(CacheTier::Edge, "invalidate", timeout, edge.invalidate(&scope)).await {
                    let key = CacheKey::from_raw(scope.to_string());
                    report_tier_error(&metrics, &events, CacheTier::Edge, "invalidate", &key, &e);
                }
            });
        }

        let durable_removed = match self.storage(CacheTier::Durable) {
            Some(durable) => {
                let timeout = Duration::from_millis(self.config.invalidation_timeout_ms.max(1));
                match timed(CacheTier::Durable, "invalidate", timeout, durable.invalidate(scope)).await {
                    Ok(removed) => removed,
                    Err(e) => {
                        let key = CacheKey::from_raw(scope.to_string());
                        report_tier_error(&self.metrics, &self.event_tx, CacheTier::Durable, "invalidate", &key, &e);
                        return Err(e);
                    }
                }
            }
            None => 0,
        };

        self.metrics.record_invalidation();
        self.emit_event(CacheEvent::Invalidated {
            scope: scope.to_string(),
            removed: memory_removed + durable_removed,
        });
        info!(
            scope = %scope,
            kind = scope.kind(),
            memory_removed,
            durable_removed,
            "Cache invalidated"
        );

        Ok(InvalidationReport {
            scope: scope.to_string(),
            memory_removed,
            durable_removed,
        })
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Wait for every detached write scheduled so far
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Number of detached tasks still running
    pub fn pending_writes(&self) -> usize {
        self.tracker.len()
    }

    /// Change the memory tier capacity
    pub fn set_memory_capacity(&self, capacity: usize) {
        self.memory.set_capacity(capacity);
    }

    /// Statistics snapshot including memory occupancy
    pub fn stats(&self) -> CacheStatsSnapshot {
        let mut snapshot = self.metrics.snapshot();
        snapshot.memory.evictions += self.memory.capacity_evictions();
        snapshot.memory_entries = self.memory.len();
        snapshot.memory_capacity = self.memory.capacity();
        snapshot
    }

    /// Reset counters
    pub fn reset_stats(&self) {
        self.metrics.reset();
    }

    /// Probe every tier
    pub async fn health_check(&self) -> Vec<TierHealth> {
        let mut report = Vec::with_capacity(3);
        for &tier in CacheTier::lookup_order() {
            let health = match self.storage(tier) {
                None => TierHealth {
                    tier,
                    enabled: false,
                    healthy: true,
                    error: None,
                },
                Some(storage) => {
                    let timeout = self.config.tier(tier).timeout();
                    match timed(tier, "health_check", timeout, storage.health_check()).await {
                        Ok(healthy) => TierHealth {
                            tier,
                            enabled: true,
                            healthy,
                            error: None,
                        },
                        Err(e) => TierHealth {
                            tier,
                            enabled: true,
                            healthy: false,
                            error: Some(e.to_string()),
                        },
                    }
                }
            };
            report.push(health);
        }
        report
    }
}

/// Run a tier call under its timeout
async fn timed<T>(
    tier: CacheTier,
    operation: &'static str,
    timeout: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::TierTimeout {
            tier,
            operation,
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

fn report_tier_error(
    metrics: &CacheMetrics,
    events: &broadcast::Sender<CacheEvent>,
    tier: CacheTier,
    operation: &'static str,
    key: &CacheKey,
    error: &Error,
) {
    match error {
        Error::TierTimeout { .. } => metrics.tier(tier).record_timeout(),
        _ => metrics.tier(tier).record_error(),
    }
    warn!(key = %key, tier = %tier, operation, error = %error, "Tier call failed, degrading to miss");
    let _ = events.send(CacheEvent::TierError {
        tier,
        operation: operation.to_string(),
        error: error.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::CachedPayload;
    use crate::cache::storage::test_support::entry;
    use crate::cache::storage::KvStore;
    use assert_matches::assert_matches;
    use bytes::Bytes;
    use chrono::Duration as ChronoDuration;

    struct Fixture {
        cache: TieredCache,
        kv: Arc<InMemoryKvStore>,
        edge: Arc<InMemoryEdgeCache>,
        knobs: Arc<TuningKnobs>,
    }

    fn fixture() -> Fixture {
        let kv = Arc::new(InMemoryKvStore::new());
        let edge = Arc::new(InMemoryEdgeCache::new());
        let knobs = Arc::new(TuningKnobs::default());
        let cache = TieredCache::new(
            TieredCacheConfig::default(),
            Some(Arc::new(EdgeTier::new(edge.clone()))),
            Some(Arc::new(DurableTier::new(kv.clone()))),
            knobs.clone(),
        );
        Fixture { cache, kv, edge, knobs }
    }

    fn key(raw: &str) -> CacheKey {
        CacheKey::from_raw(raw)
    }

    #[tokio::test]
    async fn test_store_then_resolve_is_identical() {
        let f = fixture();
        let k = key("file:GET:/api/files/42");
        let original = entry(b"file metadata", 600);

        f.cache.store(&k, &original, WorkloadProfile::Standard);
        f.cache.drain().await;

        let result = f.cache.resolve(&k, WorkloadProfile::Standard).await;
        assert_matches!(&result, CacheLookupResult::Hit { tier: CacheTier::Memory, .. });
        let hit = result.entry().unwrap();
        assert_eq!(hit.body(), original.body());
        assert_eq!(hit.status, original.status);
        assert_eq!(f.kv.len(), 1);
        assert_eq!(f.edge.len(), 1);
    }

    #[tokio::test]
    async fn test_durable_hit_populates_faster_tiers() {
        let f = fixture();
        let k = key("api:GET:/api/jobs");
        let durable = DurableTier::new(f.kv.clone());
        durable.put(&k, &entry(b"jobs", 300), 300).await.unwrap();

        let result = f.cache.resolve(&k, WorkloadProfile::Standard).await;
        assert_matches!(&result, CacheLookupResult::Hit { tier: CacheTier::Durable, populated, .. }
            if populated == &vec![CacheTier::Memory, CacheTier::Edge]);
        f.cache.drain().await;

        assert!(f.cache.memory().lookup(k.as_str()).is_some());
        assert_eq!(f.edge.len(), 1);
        assert_matches!(
            f.cache.resolve(&k, WorkloadProfile::Standard).await,
            CacheLookupResult::Hit { tier: CacheTier::Memory, .. }
        );
    }

    #[tokio::test]
    async fn test_expired_entry_is_never_served() {
        let f = fixture();
        let k = key("file:GET:/old");
        let mut stale = entry(b"old", 10);
        stale.created_at = Utc::now() - ChronoDuration::seconds(11);

        f.cache.memory().insert(k.as_str(), stale);
        assert!(f.cache.resolve(&k, WorkloadProfile::Standard).await.is_miss());
        assert!(f.cache.memory().lookup(k.as_str()).is_none());
    }

    #[tokio::test]
    async fn test_large_blob_skips_memory() {
        let f = fixture();
        let k = key("file:GET:/api/files/9/download");
        let targets = f.cache.store(&k, &entry(b"blob", 1800), WorkloadProfile::LargeBlob);
        f.cache.drain().await;

        assert_eq!(targets, vec![CacheTier::Edge, CacheTier::Durable]);
        assert!(f.cache.memory().is_empty());
        assert_matches!(
            f.cache.resolve(&k, WorkloadProfile::LargeBlob).await,
            CacheLookupResult::Hit { tier: CacheTier::Edge, ref populated, .. } if populated.is_empty()
        );
    }

    #[tokio::test]
    async fn test_durable_outage_degrades_to_miss() {
        let f = fixture();
        f.kv.set_available(false);
        f.edge.set_available(false);

        let k = key("api:GET:/x");
        assert!(f.cache.resolve(&k, WorkloadProfile::LargeBlob).await.is_miss());
        let stats = f.cache.stats();
        assert_eq!(stats.durable.errors, 1);
        assert_eq!(stats.edge.errors, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_slow_tier_times_out() {
        let f = fixture();
        f.kv.set_latency(Duration::from_millis(400));
        let k = key("api:GET:/slow");
        assert!(f.cache.resolve(&k, WorkloadProfile::Standard).await.is_miss());
        assert_eq!(f.cache.stats().durable.timeouts, 1);
    }

    #[tokio::test]
    async fn test_corrupt_durable_value_is_evicted() {
        let f = fixture();
        let k = key("file:GET:/corrupt");
        f.kv.insert_raw(k.as_str(), Bytes::from_static(b"not a frame"), Duration::from_secs(60));

        assert!(f.cache.resolve(&k, WorkloadProfile::Standard).await.is_miss());
        f.cache.drain().await;
        assert!(f.kv.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_prefix_is_idempotent_and_shadows_late_writes() {
        let f = fixture();
        let k = key("file:GET:/api/files/1");
        let written = entry(b"v1", 600);
        f.cache.store(&k, &written, WorkloadProfile::Standard);

        let scope = InvalidationScope::Prefix("file:".into());
        let first = f.cache.invalidate(&scope).await.unwrap();
        assert_eq!(first.memory_removed, 1);

        // A detached durable write created before the invalidation may land afterwards
        f.cache.drain().await;
        let durable = DurableTier::new(f.kv.clone());
        durable.put(&k, &written, 600).await.unwrap();

        assert!(f.cache.resolve(&k, WorkloadProfile::Standard).await.is_miss());

        let second = f.cache.invalidate(&scope).await.unwrap();
        assert_eq!(second.memory_removed, 0);
        assert!(f.cache.resolve(&k, WorkloadProfile::Standard).await.is_miss());

        // Fresh writes after the invalidation are served again
        let fresh = CacheEntry::new(CachedPayload::Bytes(Bytes::from_static(b"v2")), 200, 600);
        f.cache.store(&k, &fresh, WorkloadProfile::Standard);
        assert!(f.cache.resolve(&k, WorkloadProfile::Standard).await.is_hit());
    }

    #[tokio::test]
    async fn test_short_lived_entries_skip_durable_when_disabled() {
        let f = fixture();
        f.knobs.set_durable_hot_path_writes(false);

        let short = key("api:GET:/metrics/summary");
        let targets = f.cache.store(&short, &entry(b"m", 60), WorkloadProfile::Standard);
        assert_eq!(targets, vec![CacheTier::Memory, CacheTier::Edge]);

        let long = key("static:GET:/app.js");
        let targets = f.cache.store(&long, &entry(b"js", 86_400), WorkloadProfile::Standard);
        assert_eq!(targets, vec![CacheTier::Memory, CacheTier::Edge, CacheTier::Durable]);

        f.cache.drain().await;
        assert_eq!(f.kv.list("").await.unwrap(), vec![long.to_string()]);
    }

    #[tokio::test]
    async fn test_health_and_events() {
        let f = fixture();
        let mut events = f.cache.subscribe();
        let k = key("generic:GET:/");
        assert!(f.cache.resolve(&k, WorkloadProfile::Standard).await.is_miss());
        assert_matches!(events.recv().await.unwrap(), CacheEvent::Miss { .. });

        let health = f.cache.health_check().await;
        assert_eq!(health.len(), 3);
        assert!(health.iter().all(|h| h.healthy));
    }
}
