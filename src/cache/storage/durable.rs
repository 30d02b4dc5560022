//! Durable Tier
//!
//! Authoritative tier over a distributed key-value store. Entries are encoded
//! into a versioned binary frame:
//!
//! ```text
//! ┌──────┬─────────┬───────────┬──────────────┬─────────────┬──────────────┐
//! │ "TC" │ version │ algorithm │ header len   │ JSON header │ body         │
//! │ 2B   │ 1B      │ 1B        │ u32 BE       │ N bytes     │ (compressed) │
//! └──────┴─────────┴───────────┴──────────────┴─────────────┴──────────────┘
//! ```

use crate::cache::compression::CompressionManager;
use crate::cache::entry::{CacheEntry, CacheKey, CachedPayload, CompressionAlgorithm, PayloadKind};
use crate::cache::invalidation::InvalidationScope;
use crate::cache::storage::TierStorage;
use crate::cache::tier::CacheTier;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const FRAME_MAGIC: &[u8; 2] = b"TC";
const FRAME_VERSION: u8 = 1;
const FRAME_PREFIX_LEN: usize = 8;

// =============================================================================
// Key-Value Store Collaborator
// =============================================================================

/// Distributed key-value store
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Store a value that the backend expires after `expiration_ttl_secs`
    async fn put(&self, key: &str, value: Bytes, expiration_ttl_secs: u64) -> Result<()>;

    /// Delete a key, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Keys starting with `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

// =============================================================================
// Frame Codec
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct FrameHeader {
    status: u16,
    headers: Vec<(String, String)>,
    created_at: DateTime<Utc>,
    ttl_secs: u64,
    payload: PayloadKind,
    body_len: usize,
}

/// Encode an entry into a durable frame
pub fn encode_entry(entry: &CacheEntry, compression: &CompressionManager) -> Result<Bytes> {
    let header = FrameHeader {
        status: entry.status,
        headers: entry.headers.clone(),
        created_at: entry.created_at,
        ttl_secs: entry.ttl_secs,
        payload: entry.payload.kind(),
        body_len: entry.size_bytes(),
    };
    let header_json = serde_json::to_vec(&header)?;
    let header_len = u32::try_from(header_json.len())
        .map_err(|_| Error::Internal("frame header exceeds 4GB".into()))?;
    let (body, algorithm) = compression.compress(entry.body());

    let mut frame = BytesMut::with_capacity(FRAME_PREFIX_LEN + header_json.len() + body.len());
    frame.put_slice(FRAME_MAGIC);
    frame.put_u8(FRAME_VERSION);
    frame.put_u8(algorithm.to_byte());
    frame.put_u32(header_len);
    frame.put_slice(&header_json);
    frame.put_slice(&body);
    Ok(frame.freeze())
}

/// Decode a durable frame; any malformation is a `Serialization` error
pub fn decode_entry(key: &str, frame: &Bytes, compression: &CompressionManager) -> Result<CacheEntry> {
    let bad = |reason: String| Error::serialization(key, reason);

    if frame.len() < FRAME_PREFIX_LEN {
        return Err(bad(format!("frame too short ({} bytes)", frame.len())));
    }
    if &frame[..2] != FRAME_MAGIC {
        return Err(bad("bad magic".into()));
    }
    if frame[2] != FRAME_VERSION {
        return Err(bad(format!("unsupported frame version {}", frame[2])));
    }
    let algorithm = CompressionAlgorithm::from_byte(frame[3])
        .ok_or_else(|| bad(format!("unknown compression id {}", frame[3])))?;
    let header_len = u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]) as usize;
    let body_start = FRAME_PREFIX_LEN
        .checked_add(header_len)
        .filter(|end| *end <= frame.len())
        .ok_or_else(|| bad("truncated header".into()))?;

    let header: FrameHeader =
        serde_json::from_slice(&frame[FRAME_PREFIX_LEN..body_start]).map_err(|e| bad(e.to_string()))?;
    let body = compression
        .decompress(&frame[body_start..], algorithm)
        .map_err(|e| bad(e.to_string()))?;
    if body.len() != header.body_len {
        return Err(bad(format!("body length {} != {}", body.len(), header.body_len)));
    }
    if header.payload == PayloadKind::Json && serde_json::from_slice::<serde::de::IgnoredAny>(&body).is_err() {
        return Err(bad("JSON payload does not parse".into()));
    }

    let mut entry = CacheEntry::new(CachedPayload::from_parts(header.payload, body), header.status, header.ttl_secs)
        .with_headers(header.headers);
    entry.created_at = header.created_at;
    Ok(entry)
}

// =============================================================================
// Durable Tier
// =============================================================================

/// `TierStorage` over a `KvStore`
pub struct DurableTier {
    store: Arc<dyn KvStore>,
    compression: CompressionManager,
}

impl DurableTier {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::with_compression(store, CompressionManager::new())
    }

    pub fn with_compression(store: Arc<dyn KvStore>, compression: CompressionManager) -> Self {
        Self { store, compression }
    }
}

#[async_trait]
impl TierStorage for DurableTier {
    fn tier(&self) -> CacheTier {
        CacheTier::Durable
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        match self.store.get(key.as_str()).await? {
            Some(frame) => decode_entry(key.as_str(), &frame, &self.compression).map(Some),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &CacheKey, entry: &CacheEntry, ttl_secs: u64) -> Result<()> {
        let entry = entry.clamped(ttl_secs);
        let expiration = entry.remaining_ttl_secs(Utc::now()).max(1);
        let frame = encode_entry(&entry, &self.compression)?;
        self.store.put(key.as_str(), frame, expiration).await
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        self.store.delete(key.as_str()).await
    }

    async fn invalidate(&self, scope: &InvalidationScope) -> Result<u64> {
        if let InvalidationScope::Key(key) = scope {
            return Ok(self.store.delete(key.as_str()).await? as u64);
        }

        let mut removed = 0;
        for key in self.store.list(scope.list_prefix()).await? {
            if scope.matches(&key) && self.store.delete(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn health_check(&self) -> Result<bool> {
        self.store.health_check().await
    }
}

// =============================================================================
// In-Memory KV Store
// =============================================================================

/// Process-local `KvStore` with expiry, outage and latency injection
#[derive(Default)]
pub struct InMemoryKvStore {
    values: DashMap<String, (Bytes, Instant)>,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::Release);
    }

    /// Delay every operation
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::Release);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw write, bypassing the frame codec
    pub fn insert_raw(&self, key: &str, value: Bytes, ttl: Duration) {
        self.values.insert(key.to_string(), (value, Instant::now() + ttl));
    }

    async fn enter(&self, operation: &'static str) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::Acquire);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::Acquire) {
            return Err(Error::tier_unavailable(CacheTier::Durable, operation, "store unreachable"));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.enter("get").await?;
        let now = Instant::now();
        let expired = match self.values.get(key) {
            None => return Ok(None),
            Some(record) if record.1 > now => return Ok(Some(record.0.clone())),
            Some(_) => true,
        };
        if expired {
            self.values.remove(key);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: Bytes, expiration_ttl_secs: u64) -> Result<()> {
        self.enter("put").await?;
        self.insert_raw(key, value, Duration::from_secs(expiration_ttl_secs));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.enter("delete").await?;
        Ok(self.values.remove(key).is_some())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.enter("list").await?;
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .values
            .iter()
            .filter(|r| r.key().starts_with(prefix) && r.value().1 > now)
            .map(|r| r.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.unavailable.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::compression::CompressionConfig;
    use crate::cache::storage::test_support::{entry, json_entry};

    fn tier() -> (Arc<InMemoryKvStore>, DurableTier) {
        let store = Arc::new(InMemoryKvStore::new());
        (store.clone(), DurableTier::new(store))
    }

    #[test]
    fn test_frame_preserves_entry() {
        let compression = CompressionManager::with_config(CompressionConfig {
            min_size_bytes: 16,
            ..Default::default()
        });
        let body = "name,size\n".repeat(100);
        let mut original = CacheEntry::new(CachedPayload::Bytes(Bytes::from(body.clone())), 200, 1800)
            .with_headers(vec![("content-type".into(), "text/csv".into()), ("etag".into(), "\"v1\"".into())]);
        original.created_at = Utc::now();

        let frame = encode_entry(&original, &compression).unwrap();
        assert_eq!(&frame[..2], b"TC");
        assert_eq!(frame[3], CompressionAlgorithm::Lz4.to_byte());
        assert!(frame.len() < body.len());

        let decoded = decode_entry("k", &frame, &compression).unwrap();
        assert_eq!(decoded.body().as_ref(), body.as_bytes());
        assert_eq!(decoded.created_at, original.created_at);
        assert_eq!(decoded.etag.as_deref(), Some("\"v1\""));
        assert_eq!(decoded.content_type.as_deref(), Some("text/csv"));
    }

    #[test]
    fn test_malformed_frames() {
        let compression = CompressionManager::new();
        for frame in [
            Bytes::from_static(b"TC"),
            Bytes::from_static(b"XX\x01\x00\x00\x00\x00\x00"),
            Bytes::from_static(b"TC\x09\x00\x00\x00\x00\x00"),
            Bytes::from_static(b"TC\x01\x00\x00\x00\x00\xff{}"),
            Bytes::from_static(b"TC\x01\x07\x00\x00\x00\x02{}"),
        ] {
            assert!(matches!(
                decode_entry("k", &frame, &compression),
                Err(Error::Serialization { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_put_get_and_expiration_hint() {
        let (store, tier) = tier();
        let key = CacheKey::from_raw("api:GET:/api/jobs");
        tier.put(&key, &json_entry(r#"{"ok":true}"#, 300), 300).await.unwrap();

        let got = tier.get(&key).await.unwrap().unwrap();
        assert_eq!(got.body().as_ref(), br#"{"ok":true}"#);
        assert!(got.payload.is_json());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_value_is_serialization_error() {
        let (store, tier) = tier();
        store.insert_raw("file:GET:/x", Bytes::from_static(b"garbage"), Duration::from_secs(60));
        let err = tier.get(&CacheKey::from_raw("file:GET:/x")).await.unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
    }

    #[tokio::test]
    async fn test_prefix_invalidation_is_idempotent() {
        let (store, tier) = tier();
        for raw in ["file:GET:/a", "file:GET:/b", "api:GET:/c"] {
            tier.put(&CacheKey::from_raw(raw), &entry(b"x", 60), 60).await.unwrap();
        }

        let scope = InvalidationScope::Prefix("file:".into());
        assert_eq!(tier.invalidate(&scope).await.unwrap(), 2);
        assert_eq!(tier.invalidate(&scope).await.unwrap(), 0);
        assert_eq!(store.list("").await.unwrap(), vec!["api:GET:/c".to_string()]);
    }

    #[tokio::test]
    async fn test_outage_surfaces_tier_error() {
        let (store, tier) = tier();
        store.set_available(false);
        let err = tier.get(&CacheKey::from_raw("k")).await.unwrap_err();
        assert_eq!(err.tier(), Some(CacheTier::Durable));
        assert!(!tier.health_check().await.unwrap());
    }
}
