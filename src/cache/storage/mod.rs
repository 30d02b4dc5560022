//! Cache Storage Backends
//!
//! One `TierStorage` implementation per tier:
//!
//! ```text
//!   MemoryTier  ── IndexMap LRU behind a parking_lot mutex
//!   EdgeTier    ── EdgeCache collaborator (CDN), entries as HTTP responses
//!   DurableTier ── KvStore collaborator, entries as versioned binary frames
//!                    ├── InMemoryKvStore (dev/test, failure injection)
//!                    └── FileKvStore     (disk, sharded directories)
//! ```

mod durable;
mod edge;
mod file_kv;
mod memory;

pub use durable::{decode_entry, encode_entry, DurableTier, InMemoryKvStore, KvStore};
pub use edge::{EdgeCache, EdgeTier, InMemoryEdgeCache};
pub use file_kv::{FileKvStore, FileKvStoreConfig};
pub use memory::MemoryTier;

use crate::cache::entry::{CacheEntry, CacheKey};
use crate::cache::invalidation::InvalidationScope;
use crate::cache::tier::CacheTier;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

// =============================================================================
// TierStorage Trait
// =============================================================================

/// Uniform get/put/invalidate over one tier
///
/// Implementations report I/O problems as `Error::TierUnavailable` and
/// undecodable data as `Error::Serialization`; the orchestrator turns both
/// into misses.
#[async_trait]
pub trait TierStorage: Send + Sync {
    /// The tier this storage serves
    fn tier(&self) -> CacheTier;

    /// Fetch an entry (expiry is checked by the caller)
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    /// Store an entry for at most `ttl_secs`
    async fn put(&self, key: &CacheKey, entry: &CacheEntry, ttl_secs: u64) -> Result<()>;

    /// Remove one key, returning whether it was present
    async fn delete(&self, key: &CacheKey) -> Result<bool>;

    /// Remove everything in scope, returning the number of removed entries
    async fn invalidate(&self, scope: &InvalidationScope) -> Result<u64>;

    /// Current entry count, when the backend can tell cheaply
    fn entry_count(&self) -> u64 {
        0
    }

    /// Check if the backend is reachable
    async fn health_check(&self) -> Result<bool>;
}

/// Shared tier storage handle
pub type SharedTierStorage = Arc<dyn TierStorage>;
