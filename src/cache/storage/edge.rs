//! Edge Tier
//!
//! Adapts an edge/CDN cache that speaks HTTP responses. Entries are written
//! as responses under a synthetic URL with `Cache-Control: public, max-age=N`
//! so the edge expires them on its own; the absolute creation time and TTL
//! travel in private headers so a copy never outlives its source.

use crate::cache::entry::{CacheEntry, CacheKey, CachedPayload, PayloadKind};
use crate::cache::invalidation::InvalidationScope;
use crate::cache::policy::CacheControl;
use crate::cache::storage::TierStorage;
use crate::cache::tier::CacheTier;
use crate::error::{Error, Result};
use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

const CREATED_AT_HEADER: &str = "x-cache-created-at";
const TTL_HEADER: &str = "x-cache-ttl";
const PAYLOAD_HEADER: &str = "x-cache-payload";
const ORIGIN_CC_HEADER: &str = "x-cache-origin-cache-control";

/// Default base for synthetic edge URLs
pub const DEFAULT_EDGE_BASE_URL: &str = "https://edge-cache.internal";

// =============================================================================
// Edge Cache Collaborator
// =============================================================================

/// HTTP-response cache at the network edge
#[async_trait]
pub trait EdgeCache: Send + Sync {
    /// Find a stored response for a URL
    async fn match_response(&self, url: &str) -> Result<Option<Response<Bytes>>>;

    /// Store a response under a URL
    async fn put(&self, url: &str, response: Response<Bytes>) -> Result<()>;

    /// Purge a URL; edges without purge support report `false`
    async fn delete(&self, _url: &str) -> Result<bool> {
        Ok(false)
    }
}

// =============================================================================
// Edge Tier
// =============================================================================

/// `TierStorage` over an `EdgeCache`
pub struct EdgeTier {
    edge: Arc<dyn EdgeCache>,
    base_url: String,
}

impl EdgeTier {
    pub fn new(edge: Arc<dyn EdgeCache>) -> Self {
        Self::with_base_url(edge, DEFAULT_EDGE_BASE_URL)
    }

    pub fn with_base_url(edge: Arc<dyn EdgeCache>, base_url: impl Into<String>) -> Self {
        Self {
            edge,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Synthetic URL a key is stored under
    pub fn url_for(&self, key: &CacheKey) -> String {
        format!("{}/{}", self.base_url, urlencoding::encode(key.as_str()))
    }
}

#[async_trait]
impl TierStorage for EdgeTier {
    fn tier(&self) -> CacheTier {
        CacheTier::Edge
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        match self.edge.match_response(&self.url_for(key)).await? {
            Some(response) => response_to_entry(key, response).map(Some),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &CacheKey, entry: &CacheEntry, ttl_secs: u64) -> Result<()> {
        let response = entry_to_response(key, &entry.clamped(ttl_secs), Utc::now())?;
        self.edge.put(&self.url_for(key), response).await
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        self.edge.delete(&self.url_for(key)).await
    }

    async fn invalidate(&self, scope: &InvalidationScope) -> Result<u64> {
        // Edges cannot enumerate; prefix scopes rely on invalidation markers
        match scope {
            InvalidationScope::Key(key) => Ok(self.delete(key).await? as u64),
            _ => Ok(0),
        }
    }

    async fn health_check(&self) -> Result<bool> {
        let health_key = CacheKey::from_raw("__health__");
        self.edge.match_response(&self.url_for(&health_key)).await.map(|_| true)
    }
}

/// Encode an entry as an edge response
pub(crate) fn entry_to_response(key: &CacheKey, entry: &CacheEntry, now: DateTime<Utc>) -> Result<Response<Bytes>> {
    let bad = |reason: String| Error::serialization(key.as_str(), reason);

    let status = StatusCode::from_u16(entry.status).map_err(|e| bad(e.to_string()))?;
    let mut headers = HeaderMap::new();
    for (name, value) in &entry.headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| bad(e.to_string()))?;
        let value = HeaderValue::from_str(value).map_err(|e| bad(e.to_string()))?;
        if name == header::CACHE_CONTROL {
            headers.append(HeaderName::from_static(ORIGIN_CC_HEADER), value);
        } else {
            headers.append(name, value);
        }
    }

    let max_age = entry.remaining_ttl_secs(now);
    let meta = [
        ("cache-control", format!("public, max-age={}", max_age)),
        (CREATED_AT_HEADER, entry.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true)),
        (TTL_HEADER, entry.ttl_secs.to_string()),
        (
            PAYLOAD_HEADER,
            match entry.payload.kind() {
                PayloadKind::Json => "json".to_string(),
                PayloadKind::Bytes => "bytes".to_string(),
            },
        ),
    ];
    for (name, value) in meta {
        let value = HeaderValue::from_str(&value).map_err(|e| bad(e.to_string()))?;
        headers.insert(HeaderName::from_static(name), value);
    }

    let mut response = Response::new(entry.body().clone());
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

/// Decode an edge response back into an entry
pub(crate) fn response_to_entry(key: &CacheKey, response: Response<Bytes>) -> Result<CacheEntry> {
    let bad = |reason: &str| Error::serialization(key.as_str(), reason.to_string());
    let (parts, body) = response.into_parts();

    let header_str = |name: &str| parts.headers.get(name).and_then(|v| v.to_str().ok());

    let created_at = header_str(CREATED_AT_HEADER)
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| bad("missing creation time"))?;
    let ttl_secs = header_str(TTL_HEADER)
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or_else(|| bad("missing ttl"))?;
    let payload = match header_str(PAYLOAD_HEADER) {
        Some("json") => CachedPayload::Json(body),
        Some("bytes") => CachedPayload::Bytes(body),
        _ => return Err(bad("unknown payload kind")),
    };

    let mut headers = Vec::with_capacity(parts.headers.len());
    for (name, value) in parts.headers.iter() {
        let name = name.as_str();
        if matches!(name, CREATED_AT_HEADER | TTL_HEADER | PAYLOAD_HEADER) || name == header::CACHE_CONTROL.as_str() {
            continue;
        }
        let value = value.to_str().map_err(|_| bad("non-ascii header value"))?;
        let name = if name == ORIGIN_CC_HEADER {
            header::CACHE_CONTROL.as_str()
        } else {
            name
        };
        headers.push((name.to_string(), value.to_string()));
    }

    let mut entry = CacheEntry::new(payload, parts.status.as_u16(), ttl_secs).with_headers(headers);
    entry.created_at = created_at;
    Ok(entry)
}

// =============================================================================
// In-Memory Edge Cache
// =============================================================================

struct EdgeRecord {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    stored_at: Instant,
    max_age_secs: Option<u64>,
}

/// Process-local stand-in for a CDN cache that honors `max-age`
#[derive(Default)]
pub struct InMemoryEdgeCache {
    records: DashMap<String, EdgeRecord>,
    unavailable: AtomicBool,
}

impl InMemoryEdgeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::Release);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn check_available(&self, operation: &'static str) -> Result<()> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(Error::tier_unavailable(CacheTier::Edge, operation, "edge unreachable"));
        }
        Ok(())
    }
}

#[async_trait]
impl EdgeCache for InMemoryEdgeCache {
    async fn match_response(&self, url: &str) -> Result<Option<Response<Bytes>>> {
        self.check_available("match")?;

        let expired = match self.records.get(url) {
            None => return Ok(None),
            Some(record) => record
                .max_age_secs
                .map_or(false, |max_age| record.stored_at.elapsed().as_secs() >= max_age),
        };
        if expired {
            self.records.remove(url);
            return Ok(None);
        }

        Ok(self.records.get(url).map(|record| {
            let mut response = Response::new(record.body.clone());
            *response.status_mut() = record.status;
            *response.headers_mut() = record.headers.clone();
            response
        }))
    }

    async fn put(&self, url: &str, response: Response<Bytes>) -> Result<()> {
        self.check_available("put")?;

        let (parts, body) = response.into_parts();
        let cc = CacheControl::from_headers(&parts.headers);
        if cc.no_store || cc.private {
            return Ok(());
        }
        self.records.insert(
            url.to_string(),
            EdgeRecord {
                status: parts.status,
                headers: parts.headers,
                body,
                stored_at: Instant::now(),
                max_age_secs: cc.explicit_ttl(),
            },
        );
        Ok(())
    }

    async fn delete(&self, url: &str) -> Result<bool> {
        self.check_available("delete")?;
        Ok(self.records.remove(url).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::storage::test_support::{entry, json_entry};

    fn tier() -> (Arc<InMemoryEdgeCache>, EdgeTier) {
        let edge = Arc::new(InMemoryEdgeCache::new());
        (edge.clone(), EdgeTier::new(edge))
    }

    #[tokio::test]
    async fn test_put_and_get_preserves_entry() {
        let (_, tier) = tier();
        let key = CacheKey::from_raw("api:GET:/api/jobs?page=1");
        let original = json_entry(r#"{"jobs":[]}"#, 300).with_headers(vec![
            ("content-type".into(), "application/json".into()),
            ("cache-control".into(), "public, max-age=300".into()),
        ]);

        tier.put(&key, &original, 300).await.unwrap();
        let restored = tier.get(&key).await.unwrap().unwrap();

        assert_eq!(restored.body(), original.body());
        assert!(restored.payload.is_json());
        assert_eq!(restored.created_at, original.created_at);
        assert_eq!(restored.ttl_secs, 300);
        assert_eq!(restored.header("cache-control"), Some("public, max-age=300"));
        assert_eq!(restored.content_type.as_deref(), Some("application/json"));
    }

    #[tokio::test]
    async fn test_put_clamps_ttl() {
        let (_, tier) = tier();
        let key = CacheKey::from_raw("static:GET:/a.css");
        tier.put(&key, &entry(b"css", 86_400), 600).await.unwrap();
        assert_eq!(tier.get(&key).await.unwrap().unwrap().ttl_secs, 600);
    }

    #[tokio::test]
    async fn test_url_is_encoded() {
        let (_, tier) = tier();
        let url = tier.url_for(&CacheKey::from_raw("file:GET:/a?b=1#enc=gzip"));
        assert_eq!(url, "https://edge-cache.internal/file%3AGET%3A%2Fa%3Fb%3D1%23enc%3Dgzip");
    }

    #[tokio::test]
    async fn test_key_invalidation_and_outage() {
        let (edge, tier) = tier();
        let key = CacheKey::from_raw("file:GET:/x");
        tier.put(&key, &entry(b"x", 60), 60).await.unwrap();

        assert_eq!(tier.invalidate(&InvalidationScope::Key(key.clone())).await.unwrap(), 1);
        assert_eq!(tier.invalidate(&InvalidationScope::Key(key.clone())).await.unwrap(), 0);

        edge.set_available(false);
        let err = tier.get(&key).await.unwrap_err();
        assert_eq!(err.tier(), Some(CacheTier::Edge));
        assert!(!tier.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_metadata_is_serialization_error() {
        let key = CacheKey::from_raw("k");
        let response = Response::new(Bytes::from_static(b"raw"));
        assert!(matches!(
            response_to_entry(&key, response),
            Err(Error::Serialization { .. })
        ));
    }
}
