//! Cache Metrics
//!
//! Cache-line aligned atomic counters, one record per tier plus request-level
//! totals. Counters are relaxed atomics; snapshots are point-in-time reads.

use crate::cache::tier::CacheTier;
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache line size for alignment (64 bytes on most modern CPUs)
pub const CACHE_LINE_SIZE: usize = 64;

// =============================================================================
// Tier Record (Cache-Line Aligned)
// =============================================================================

/// Counters for a single tier, aligned to prevent false sharing
#[repr(C, align(64))]
#[derive(Debug)]
pub struct TierRecord {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    /// I/O failures and undecodable entries
    pub errors: AtomicU64,
    pub timeouts: AtomicU64,
    pub writes: AtomicU64,
    /// Capacity evictions plus expired/invalidated removals
    pub evictions: AtomicU64,
    /// Last update timestamp (Unix millis)
    pub last_update_ms: AtomicU64,
    _padding: [u8; 8],
}

const _: () = assert!(std::mem::size_of::<TierRecord>() <= CACHE_LINE_SIZE);

impl Default for TierRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl TierRecord {
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            last_update_ms: AtomicU64::new(0),
            _padding: [0; 8],
        }
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    fn touch(&self) {
        self.last_update_ms
            .store(Utc::now().timestamp_millis() as u64, Ordering::Release);
    }

    /// Zero every counter
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.errors,
            &self.timeouts,
            &self.writes,
            &self.evictions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.touch();
    }

    pub fn snapshot(&self) -> TierRecordSnapshot {
        TierRecordSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of a tier record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TierRecordSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub writes: u64,
    pub evictions: u64,
}

impl TierRecordSnapshot {
    pub fn hit_ratio(&self) -> f64 {
        ratio(self.hits, self.hits + self.misses)
    }
}

// =============================================================================
// Cache Metrics
// =============================================================================

/// Request-level totals plus per-tier records
#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub memory: TierRecord,
    pub edge: TierRecord,
    pub durable: TierRecord,
    /// Lookups answered by any tier
    pub hits: AtomicU64,
    /// Lookups answered by no tier
    pub misses: AtomicU64,
    /// Requests that skipped the cache
    pub bypasses: AtomicU64,
    /// Responses accepted for storage
    pub stores: AtomicU64,
    /// Responses rejected by policy
    pub skipped_stores: AtomicU64,
    /// Faster-tier populations after a slower-tier hit
    pub populations: AtomicU64,
    pub invalidations: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record for a specific tier
    pub fn tier(&self, tier: CacheTier) -> &TierRecord {
        match tier {
            CacheTier::Memory => &self.memory,
            CacheTier::Edge => &self.edge,
            CacheTier::Durable => &self.durable,
        }
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_bypass(&self) {
        self.bypasses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_store(&self) {
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_skipped_store(&self) {
        self.skipped_stores.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_population(&self) {
        self.populations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Zero every counter (management API)
    pub fn reset(&self) {
        self.memory.reset();
        self.edge.reset();
        self.durable.reset();
        for counter in [
            &self.hits,
            &self.misses,
            &self.bypasses,
            &self.stores,
            &self.skipped_stores,
            &self.populations,
            &self.invalidations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        CacheStatsSnapshot {
            hits,
            misses,
            hit_ratio: ratio(hits, hits + misses),
            bypasses: self.bypasses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            skipped_stores: self.skipped_stores.load(Ordering::Relaxed),
            populations: self.populations.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            memory: self.memory.snapshot(),
            edge: self.edge.snapshot(),
            durable: self.durable.snapshot(),
            memory_entries: 0,
            memory_capacity: 0,
        }
    }
}

/// Aggregate statistics across all tiers
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub bypasses: u64,
    pub stores: u64,
    pub skipped_stores: u64,
    pub populations: u64,
    pub invalidations: u64,
    pub memory: TierRecordSnapshot,
    pub edge: TierRecordSnapshot,
    pub durable: TierRecordSnapshot,
    /// Filled in by the orchestrator
    pub memory_entries: usize,
    pub memory_capacity: usize,
}

impl CacheStatsSnapshot {
    pub fn tier(&self, tier: CacheTier) -> &TierRecordSnapshot {
        match tier {
            CacheTier::Memory => &self.memory,
            CacheTier::Edge => &self.edge,
            CacheTier::Durable => &self.durable,
        }
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_line_alignment() {
        assert_eq!(std::mem::align_of::<TierRecord>(), CACHE_LINE_SIZE);
        assert!(std::mem::size_of::<TierRecord>() <= CACHE_LINE_SIZE);
    }

    #[test]
    fn test_tier_record_counters() {
        let record = TierRecord::new();
        record.record_hit();
        record.record_hit();
        record.record_miss();
        record.record_timeout();
        record.record_write();

        let snap = record.snapshot();
        assert_eq!(snap.hits, 2);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.timeouts, 1);
        assert_eq!(snap.writes, 1);
        assert!((snap.hit_ratio() - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_snapshot_and_reset() {
        let metrics = CacheMetrics::new();
        metrics.record_hit();
        metrics.record_miss();
        metrics.record_miss();
        metrics.tier(CacheTier::Durable).record_error();

        let snap = metrics.snapshot();
        assert_eq!(snap.hits, 1);
        assert_eq!(snap.misses, 2);
        assert_eq!(snap.tier(CacheTier::Durable).errors, 1);
        assert!((snap.hit_ratio - 1.0 / 3.0).abs() < 1e-9);

        metrics.reset();
        let snap = metrics.snapshot();
        assert_eq!(snap.hits, 0);
        assert_eq!(snap.durable, TierRecordSnapshot::default());
    }
}
