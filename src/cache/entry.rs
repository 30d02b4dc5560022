//! Cache Entry Types
//!
//! Defines cache keys, cached payloads and entries.

use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Cache Key
// =============================================================================

/// Deterministic, bounded-length cache key
///
/// Keys have the shape `{namespace}:{METHOD}:{path}[?{query}][#{vary}]`.
/// Construct them through [`crate::cache::keys::KeyDeriver`]; `from_raw` exists
/// for keys read back from a tier listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap an already-derived key string
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The key as stored in every tier
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Strategy namespace (text before the first `:`)
    pub fn namespace(&self) -> &str {
        self.0.split_once(':').map(|(ns, _)| ns).unwrap_or(&self.0)
    }

    /// Check whether the key falls under a prefix scope
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }

    /// Key length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the key is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Cached Payload
// =============================================================================

/// Payload held by a cache entry
///
/// JSON documents keep their original bytes so a hit is byte-identical to the
/// response that was stored.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedPayload {
    /// Opaque bytes (files, static assets, documents)
    Bytes(Bytes),
    /// A validated JSON document
    Json(Bytes),
}

impl CachedPayload {
    /// Raw body bytes
    pub fn body(&self) -> &Bytes {
        match self {
            CachedPayload::Bytes(b) | CachedPayload::Json(b) => b,
        }
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.body().len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.body().is_empty()
    }

    /// Whether this is a structured payload
    pub fn is_json(&self) -> bool {
        matches!(self, CachedPayload::Json(_))
    }

    /// Parse the payload as a JSON value
    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_slice(self.body())
    }

    /// Payload kind label used by the durable codec
    pub fn kind(&self) -> PayloadKind {
        match self {
            CachedPayload::Bytes(_) => PayloadKind::Bytes,
            CachedPayload::Json(_) => PayloadKind::Json,
        }
    }

    /// Rebuild a payload from its kind and body
    pub fn from_parts(kind: PayloadKind, body: Bytes) -> Self {
        match kind {
            PayloadKind::Bytes => CachedPayload::Bytes(body),
            PayloadKind::Json => CachedPayload::Json(body),
        }
    }
}

/// Payload kind discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    Bytes,
    Json,
}

/// Compression algorithm identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    #[default]
    None,
    Lz4,
    Zstd,
    Snappy,
}

impl CompressionAlgorithm {
    /// Wire identifier used in the durable frame
    pub fn to_byte(self) -> u8 {
        match self {
            CompressionAlgorithm::None => 0,
            CompressionAlgorithm::Lz4 => 1,
            CompressionAlgorithm::Zstd => 2,
            CompressionAlgorithm::Snappy => 3,
        }
    }

    /// Parse the wire identifier
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(CompressionAlgorithm::None),
            1 => Some(CompressionAlgorithm::Lz4),
            2 => Some(CompressionAlgorithm::Zstd),
            3 => Some(CompressionAlgorithm::Snappy),
            _ => None,
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionAlgorithm::None => write!(f, "none"),
            CompressionAlgorithm::Lz4 => write!(f, "lz4"),
            CompressionAlgorithm::Zstd => write!(f, "zstd"),
            CompressionAlgorithm::Snappy => write!(f, "snappy"),
        }
    }
}

// =============================================================================
// Cache Entry
// =============================================================================

/// A cached response
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Response body
    pub payload: Arc<CachedPayload>,
    /// HTTP status code of the stored response
    pub status: u16,
    /// Response headers worth replaying on a hit (lowercase names)
    pub headers: Vec<(String, String)>,
    /// Content type, if known
    pub content_type: Option<String>,
    /// Time when the entry was created (shared by every tier copy)
    pub created_at: DateTime<Utc>,
    /// Time-to-live in seconds
    pub ttl_secs: u64,
    /// ETag for validation
    pub etag: Option<String>,
    /// Last-Modified for validation
    pub last_modified: Option<String>,
}

impl CacheEntry {
    /// Create a new entry created now
    pub fn new(payload: CachedPayload, status: u16, ttl_secs: u64) -> Self {
        Self {
            payload: Arc::new(payload),
            status,
            headers: Vec::new(),
            content_type: None,
            created_at: Utc::now(),
            ttl_secs,
            etag: None,
            last_modified: None,
        }
    }

    /// Attach replayable headers
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.etag = header_value(&headers, "etag");
        self.last_modified = header_value(&headers, "last-modified");
        self.content_type = header_value(&headers, "content-type");
        self.headers = headers;
        self
    }

    /// Instant after which the entry must never be served
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + ChronoDuration::seconds(self.ttl_secs.min(i64::MAX as u64) as i64)
    }

    /// Check expiry against a given instant (`now > expires_at`)
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }

    /// Check expiry against the current time
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Whole seconds left before expiry, rounded up (0 once expired)
    pub fn remaining_ttl_secs(&self, now: DateTime<Utc>) -> u64 {
        let remaining = self.expires_at().signed_duration_since(now);
        let millis = remaining.num_milliseconds();
        if millis <= 0 {
            0
        } else {
            ((millis + 999) / 1000) as u64
        }
    }

    /// Age in whole seconds
    pub fn age_secs(&self, now: DateTime<Utc>) -> u64 {
        now.signed_duration_since(self.created_at).num_seconds().max(0) as u64
    }

    /// Copy of this entry whose TTL does not exceed `max_ttl_secs`
    ///
    /// `created_at` is preserved so the copy never outlives the original.
    pub fn clamped(&self, max_ttl_secs: u64) -> Self {
        let mut copy = self.clone();
        copy.ttl_secs = copy.ttl_secs.min(max_ttl_secs);
        copy
    }

    /// Body size in bytes
    pub fn size_bytes(&self) -> usize {
        self.payload.len()
    }

    /// Raw body
    pub fn body(&self) -> &Bytes {
        self.payload.body()
    }

    /// Look up a stored header
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn header_value(headers: &[(String, String)], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_namespace() {
        let key = CacheKey::from_raw("file:GET:/api/files/42");
        assert_eq!(key.namespace(), "file");
        assert!(key.has_prefix("file:"));
        assert!(!key.has_prefix("api:"));
        assert_eq!(key.to_string(), "file:GET:/api/files/42");
    }

    #[test]
    fn test_payload_accessors() {
        let json = CachedPayload::Json(Bytes::from_static(br#"{"id":42}"#));
        assert!(json.is_json());
        assert_eq!(json.kind(), PayloadKind::Json);
        assert_eq!(json.to_value().unwrap()["id"], 42);

        let raw = CachedPayload::from_parts(PayloadKind::Bytes, Bytes::from_static(b"abc"));
        assert!(!raw.is_json());
        assert_eq!(raw.len(), 3);
    }

    #[test]
    fn test_compression_algorithm_bytes() {
        for algo in [
            CompressionAlgorithm::None,
            CompressionAlgorithm::Lz4,
            CompressionAlgorithm::Zstd,
            CompressionAlgorithm::Snappy,
        ] {
            assert_eq!(CompressionAlgorithm::from_byte(algo.to_byte()), Some(algo));
        }
        assert_eq!(CompressionAlgorithm::from_byte(42), None);
    }

    #[test]
    fn test_entry_expiry_boundary() {
        let mut entry = CacheEntry::new(CachedPayload::Bytes(Bytes::from("x")), 200, 600);
        let created = entry.created_at;

        // Exactly at expires_at the entry is still servable
        assert!(!entry.is_expired_at(created + ChronoDuration::seconds(600)));
        assert!(entry.is_expired_at(created + ChronoDuration::seconds(600) + ChronoDuration::milliseconds(1)));

        entry.created_at = Utc::now() - ChronoDuration::seconds(700);
        assert!(entry.is_expired());
        assert_eq!(entry.remaining_ttl_secs(Utc::now()), 0);
    }

    #[test]
    fn test_entry_remaining_ttl_and_clamp() {
        let entry = CacheEntry::new(CachedPayload::Bytes(Bytes::from("x")), 200, 600);
        let now = entry.created_at + ChronoDuration::seconds(100);
        assert_eq!(entry.remaining_ttl_secs(now), 500);
        assert_eq!(entry.age_secs(now), 100);

        let clamped = entry.clamped(60);
        assert_eq!(clamped.ttl_secs, 60);
        assert_eq!(clamped.created_at, entry.created_at);
        assert_eq!(entry.clamped(6000).ttl_secs, 600);
    }

    #[test]
    fn test_entry_headers() {
        let entry = CacheEntry::new(CachedPayload::Bytes(Bytes::from("x")), 200, 60).with_headers(vec![
            ("content-type".into(), "text/csv".into()),
            ("etag".into(), "\"abc\"".into()),
        ]);
        assert_eq!(entry.content_type.as_deref(), Some("text/csv"));
        assert_eq!(entry.etag.as_deref(), Some("\"abc\""));
        assert_eq!(entry.header("Content-Type"), Some("text/csv"));
        assert_eq!(entry.last_modified, None);
    }
}
