//! Memory Tier
//!
//! Process-local LRU bounded by entry count. The map sits behind a
//! short-critical-section `parking_lot::Mutex`; no lock is held across an
//! await point. Capacity can be changed at runtime (optimizer knob).

use crate::cache::entry::{CacheEntry, CacheKey};
use crate::cache::invalidation::InvalidationScope;
use crate::cache::storage::TierStorage;
use crate::cache::tier::{CacheTier, DEFAULT_MEMORY_CAPACITY};
use crate::error::Result;
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Memory tier backed by an insertion-ordered map (front = least recent)
pub struct MemoryTier {
    entries: Mutex<IndexMap<String, CacheEntry>>,
    capacity: AtomicUsize,
    capacity_evictions: AtomicU64,
}

impl MemoryTier {
    /// Create with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CAPACITY)
    }

    /// Create with a maximum entry count
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(IndexMap::with_capacity(capacity.min(1024))),
            capacity: AtomicUsize::new(capacity.max(1)),
            capacity_evictions: AtomicU64::new(0),
        }
    }

    /// Current maximum entry count
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// Change the maximum entry count, evicting least-recent entries if needed
    pub fn set_capacity(&self, capacity: usize) {
        let capacity = capacity.max(1);
        self.capacity.store(capacity, Ordering::Release);
        let mut entries = self.entries.lock();
        self.trim(&mut entries, capacity);
    }

    /// Entries evicted because of capacity
    pub fn capacity_evictions(&self) -> u64 {
        self.capacity_evictions.load(Ordering::Relaxed)
    }

    /// Number of resident entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up and mark as most recently used
    pub fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let mut entries = self.entries.lock();
        let index = entries.get_index_of(key)?;
        let last = entries.len() - 1;
        entries.move_index(index, last);
        entries.get_index(last).map(|(_, entry)| entry.clone())
    }

    /// Insert as most recently used
    pub fn insert(&self, key: &str, entry: CacheEntry) {
        let capacity = self.capacity();
        let mut entries = self.entries.lock();
        entries.shift_remove(key);
        entries.insert(key.to_string(), entry);
        self.trim(&mut entries, capacity);
    }

    /// Remove one key
    pub fn remove(&self, key: &str) -> bool {
        self.entries.lock().shift_remove(key).is_some()
    }

    /// Remove all keys in scope
    pub fn remove_matching(&self, scope: &InvalidationScope) -> u64 {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| !scope.matches(key));
        (before - entries.len()) as u64
    }

    fn trim(&self, entries: &mut IndexMap<String, CacheEntry>, capacity: usize) {
        let mut evicted = 0u64;
        while entries.len() > capacity {
            entries.shift_remove_index(0);
            evicted += 1;
        }
        if evicted > 0 {
            self.capacity_evictions.fetch_add(evicted, Ordering::Relaxed);
            tracing::debug!(evicted, capacity, "Memory tier over capacity");
        }
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TierStorage for MemoryTier {
    fn tier(&self) -> CacheTier {
        CacheTier::Memory
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        Ok(self.lookup(key.as_str()))
    }

    async fn put(&self, key: &CacheKey, entry: &CacheEntry, ttl_secs: u64) -> Result<()> {
        self.insert(key.as_str(), entry.clamped(ttl_secs));
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.remove(key.as_str()))
    }

    async fn invalidate(&self, scope: &InvalidationScope) -> Result<u64> {
        Ok(match scope {
            InvalidationScope::Key(key) => self.remove(key.as_str()) as u64,
            _ => self.remove_matching(scope),
        })
    }

    fn entry_count(&self) -> u64 {
        self.len() as u64
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
