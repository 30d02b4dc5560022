//! End-to-end cache scenarios through the public API

use axum::http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use bytes::Bytes;
use chrono::{Duration as ChronoDuration, Utc};
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiered_response_cache::cache::storage::encode_entry;
use tiered_response_cache::cache::{CacheLookupResult, CompressionManager, SkipReason};
use tiered_response_cache::{
    handler_fn, with_caching, CacheEntry, CacheEvent, CacheKey, CacheLayerConfig, CacheManagement,
    CacheService, CacheTier, CachedPayload, Handler, InMemoryEdgeCache, InMemoryKvStore, KvStore, RequestOutcome,
    WorkloadProfile,
};

// =============================================================================
// Fixtures
// =============================================================================

struct Fixture {
    service: Arc<CacheService>,
    kv: Arc<InMemoryKvStore>,
}

async fn fixture_with(config: CacheLayerConfig) -> Fixture {
    let kv = Arc::new(InMemoryKvStore::new());
    let service = CacheService::builder()
        .config(config)
        .edge_cache(Arc::new(InMemoryEdgeCache::new()))
        .kv_store(kv.clone())
        .build()
        .await
        .unwrap();
    Fixture { service, kv }
}

async fn fixture() -> Fixture {
    fixture_with(CacheLayerConfig::default()).await
}

/// Origin that counts calls and answers with a fixed response
fn counting_origin(
    status: u16,
    body: &'static [u8],
    delay: Duration,
) -> (impl Handler<Error = Infallible>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let handler = handler_fn(move |_req: Request<Bytes>| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok::<_, Infallible>(
                Response::builder()
                    .status(StatusCode::from_u16(status).unwrap())
                    .header("content-type", "application/json")
                    .body(Bytes::from_static(body))
                    .unwrap(),
            )
        }
    });
    (handler, calls)
}

fn get(path: &str) -> Request<Bytes> {
    Request::builder().uri(path).body(Bytes::new()).unwrap()
}

fn key_for(service: &CacheService, namespace: &str, path: &str) -> CacheKey {
    let uri: Uri = path.parse().unwrap();
    service
        .keys()
        .derive(namespace, &Method::GET, &uri, &HeaderMap::new())
        .unwrap()
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_file_metadata_cold_then_warm() {
    let fx = fixture().await;
    let mut events = fx.service.cache().subscribe();
    let (origin, calls) = counting_origin(200, b"{\"id\":42,\"name\":\"report.pdf\"}", Duration::ZERO);

    let (first, outcome) = fx.service.execute(get("/api/files/42"), &origin).await;
    assert_eq!(outcome, RequestOutcome::Stored);
    assert_eq!(first.unwrap().headers()["x-cache"], "MISS");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let stored_ttl = loop {
        match events.recv().await.unwrap() {
            CacheEvent::Stored { ttl_secs, .. } => break ttl_secs,
            _ => continue,
        }
    };
    assert_eq!(stored_ttl, 600);

    let (second, outcome) = fx.service.execute(get("/api/files/42"), &origin).await;
    let second = second.unwrap();
    assert_eq!(outcome, RequestOutcome::Hit(CacheTier::Memory));
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.body().as_ref(), b"{\"id\":42,\"name\":\"report.pdf\"}");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_request_no_cache_is_never_stored() {
    let fx = fixture().await;
    let (origin, calls) = counting_origin(200, b"{}", Duration::ZERO);

    for _ in 0..2 {
        let request = Request::builder()
            .uri("/api/files/7")
            .header("cache-control", "no-cache")
            .body(Bytes::new())
            .unwrap();
        let (_, outcome) = fx.service.execute(request, &origin).await;
        assert_eq!(outcome, RequestOutcome::Bypass);
    }
    fx.service.cache().drain().await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(fx.service.stats().stores, 0);
    assert!(fx.kv.is_empty());
}

#[tokio::test]
async fn test_not_found_is_never_cached() {
    let fx = fixture().await;
    let (origin, calls) = counting_origin(404, b"{\"error\":\"not found\"}", Duration::ZERO);

    for _ in 0..2 {
        let (response, outcome) = fx.service.execute(get("/api/files/missing"), &origin).await;
        assert_eq!(response.unwrap().status(), StatusCode::NOT_FOUND);
        assert_eq!(outcome, RequestOutcome::Skipped(SkipReason::ErrorStatus(404)));
    }
    fx.service.cache().drain().await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(fx.kv.is_empty());
}

#[tokio::test]
async fn test_invalidate_after_write_misses_durable() {
    let fx = fixture().await;
    let (origin, _) = counting_origin(200, b"{\"v\":1}", Duration::ZERO);
    let key = key_for(&fx.service, "file", "/api/files/42");

    fx.service.execute(get("/api/files/42"), &origin).await;
    fx.service.cache().drain().await;
    assert!(fx.kv.get(key.as_str()).await.unwrap().is_some());

    let report = fx.service.invalidate("file:").await.unwrap();
    assert_eq!(report.memory_removed, 1);
    assert_eq!(report.durable_removed, 1);

    let lookup = fx.service.cache().resolve(&key, WorkloadProfile::Standard).await;
    assert!(lookup.is_miss());
    assert!(fx.kv.get(key.as_str()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_invalidate_shadows_detached_write_landing_late() {
    let fx = fixture().await;
    let (origin, _) = counting_origin(200, b"{\"v\":1}", Duration::ZERO);
    let key = key_for(&fx.service, "file", "/api/files/9");

    // Durable write still in flight when the invalidation runs
    fx.kv.set_latency(Duration::from_millis(30));
    fx.service.execute(get("/api/files/9"), &origin).await;
    fx.service.invalidate("file:").await.unwrap();
    fx.kv.set_latency(Duration::ZERO);
    fx.service.cache().drain().await;

    let lookup = fx.service.cache().resolve(&key, WorkloadProfile::Standard).await;
    assert!(lookup.is_miss());
}

#[tokio::test]
async fn test_concurrent_identical_cold_requests() {
    let fx = fixture().await;
    let (origin, calls) = counting_origin(200, b"{\"id\":1}", Duration::from_millis(20));
    let handler = Arc::new(with_caching(origin, fx.service.clone()));

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let handler = handler.clone();
        tasks.push(tokio::spawn(async move { handler.call(get("/api/files/1")).await }));
    }
    for task in tasks {
        let response = task.await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().as_ref(), b"{\"id\":1}");
    }
    fx.service.cache().drain().await;

    let handled = calls.load(Ordering::SeqCst);
    assert!((1..=20).contains(&handled));

    let (response, outcome) = handler.call_with_outcome(get("/api/files/1")).await;
    assert_eq!(outcome, RequestOutcome::Hit(CacheTier::Memory));
    assert_eq!(response.unwrap().body().as_ref(), b"{\"id\":1}");
    assert_eq!(calls.load(Ordering::SeqCst), handled);
}

// =============================================================================
// Properties
// =============================================================================

#[tokio::test]
async fn test_keys_are_deterministic() {
    let fx = fixture().await;
    let a = key_for(&fx.service, "api", "/api/jobs?b=2&a=1");
    let b = key_for(&fx.service, "api", "/api/jobs?a=1&b=2");
    assert_eq!(a, b);
    assert_ne!(a, key_for(&fx.service, "api", "/api/jobs?a=1&b=3"));
}

#[tokio::test]
async fn test_expired_entry_is_never_a_hit() {
    let fx = fixture().await;
    let key = key_for(&fx.service, "api", "/api/jobs/old");
    let mut entry = CacheEntry::new(CachedPayload::Bytes(Bytes::from_static(b"stale")), 200, 5);
    entry.created_at = Utc::now() - ChronoDuration::seconds(10);

    fx.service.cache().store(&key, &entry, WorkloadProfile::Standard);
    fx.service.cache().drain().await;

    assert!(fx.service.cache().resolve(&key, WorkloadProfile::Standard).await.is_miss());
}

#[tokio::test]
async fn test_invalidating_twice_equals_once() {
    let fx = fixture().await;
    let (origin, calls) = counting_origin(200, b"{}", Duration::ZERO);
    fx.service.execute(get("/api/jobs/3"), &origin).await;
    fx.service.cache().drain().await;

    let first = fx.service.invalidate("api:GET:/api/jobs/3").await.unwrap();
    let second = fx.service.invalidate("api:GET:/api/jobs/3").await.unwrap();
    assert_eq!(first.memory_removed, 1);
    assert_eq!(second.memory_removed, 0);
    assert_eq!(second.durable_removed, 0);

    let (_, outcome) = fx.service.execute(get("/api/jobs/3"), &origin).await;
    assert_eq!(outcome, RequestOutcome::Stored);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_durable_hit_populates_faster_tiers() {
    let fx = fixture().await;
    let key = key_for(&fx.service, "file", "/api/files/77");
    let entry = CacheEntry::new(CachedPayload::Bytes(Bytes::from_static(b"from-durable")), 200, 600);
    let frame = encode_entry(&entry, &CompressionManager::new()).unwrap();
    fx.kv.put(key.as_str(), frame, 600).await.unwrap();

    match fx.service.cache().resolve(&key, WorkloadProfile::Standard).await {
        CacheLookupResult::Hit { tier, entry, .. } => {
            assert_eq!(tier, CacheTier::Durable);
            assert_eq!(entry.body().as_ref(), b"from-durable");
        }
        CacheLookupResult::Miss => panic!("expected a durable hit"),
    }
    fx.service.cache().drain().await;

    assert!(fx.service.cache().memory().lookup(key.as_str()).is_some());
    match fx.service.cache().resolve(&key, WorkloadProfile::Standard).await {
        CacheLookupResult::Hit { tier, .. } => assert_eq!(tier, CacheTier::Memory),
        CacheLookupResult::Miss => panic!("expected a memory hit"),
    }
}

#[tokio::test]
async fn test_status_threshold() {
    let fx = fixture().await;
    let (ok_origin, _) = counting_origin(399, b"{}", Duration::ZERO);
    let (_, outcome) = fx.service.execute(get("/api/jobs/399"), &ok_origin).await;
    assert_eq!(outcome, RequestOutcome::Stored);

    let (bad_origin, _) = counting_origin(400, b"{}", Duration::ZERO);
    let (_, outcome) = fx.service.execute(get("/api/jobs/400"), &bad_origin).await;
    assert_eq!(outcome, RequestOutcome::Skipped(SkipReason::ErrorStatus(400)));
}

#[tokio::test]
async fn test_body_size_limit() {
    let mut config = CacheLayerConfig::default();
    config.policy.max_body_bytes = 8;
    let fx = fixture_with(config).await;

    let (at_limit, _) = counting_origin(200, b"{\"a\":12}", Duration::ZERO);
    let (_, outcome) = fx.service.execute(get("/api/jobs/at"), &at_limit).await;
    assert_eq!(outcome, RequestOutcome::Stored);

    let (over_limit, _) = counting_origin(200, b"{\"a\":123}", Duration::ZERO);
    let (_, outcome) = fx.service.execute(get("/api/jobs/over"), &over_limit).await;
    assert_eq!(outcome, RequestOutcome::Skipped(SkipReason::TooLarge { size: 9, limit: 8 }));
}

#[tokio::test]
async fn test_warm_then_hit() {
    let fx = fixture().await;
    let (origin, calls) = counting_origin(200, b"{\"warm\":true}", Duration::ZERO);
    let handler = with_caching(origin, fx.service.clone());

    let urls = vec!["/api/files/1".to_string(), "/api/files/2".to_string(), "/api/files/1".to_string()];
    let report = handler.warm(&urls).await;
    assert_eq!(report.requested, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(report.warmed + report.already_cached, 3);

    let before = calls.load(Ordering::SeqCst);
    let (_, outcome) = handler.call_with_outcome(get("/api/files/2")).await;
    assert_eq!(outcome, RequestOutcome::Hit(CacheTier::Memory));
    assert_eq!(calls.load(Ordering::SeqCst), before);
}
