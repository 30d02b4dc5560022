//! Cache Service
//!
//! Owns every collaborator of the cache layer and runs the request path:
//!
//! ```text
//!   request ──► timer ──► classify ──► bypass? ──► derive key ──► strategy.resolve
//!                                         │                           │
//!                                         ▼                    hit ◄──┴──► miss
//!                                    pass through                │          │
//!                                                                │    handler.call
//!                                                                │          │
//!                                                                │   strategy.store
//!                                                                ▼          ▼
//!                                                          response + X-Cache headers
//! ```
//!
//! Failures inside the cache never reach the client: the request degrades
//! to a pass-through to the wrapped handler.

use crate::cache::compression::CompressionManager;
use crate::cache::entry::CacheKey;
use crate::cache::invalidation::InvalidationScope;
use crate::cache::keys::KeyDeriver;
use crate::cache::metrics::CacheStatsSnapshot;
use crate::cache::orchestrator::{InvalidationReport, TierHealth, TieredCache};
use crate::cache::policy::{request_bypasses_cache, SkipReason, TtlPolicy};
use crate::cache::storage::{
    DurableTier, EdgeCache, EdgeTier, FileKvStore, InMemoryKvStore, KvStore, SharedTierStorage,
};
use crate::cache::tier::CacheTier;
use crate::config::{CacheLayerConfig, DurableBackend};
use crate::error::Result;
use crate::handler::Handler;
use crate::optimizer::{OptimizationState, Optimizer, TuningKnobs};
use crate::strategy::{RequestInfo, StoreOutcome, StrategyContext, StrategyRouter};
use crate::telemetry::{
    CacheOutcome, MetricsSink, RequestTimer, ServiceMetrics, TelemetryAggregate, TelemetryCollector,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const X_CACHE: &str = "x-cache";
pub const X_CACHE_TIER: &str = "x-cache-tier";

// =============================================================================
// Request Outcome
// =============================================================================

/// How the cache treated one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Served from a tier
    Hit(CacheTier),
    /// Fetched from the handler and stored
    Stored,
    /// Fetched from the handler, not stored
    Skipped(SkipReason),
    /// Request asked to skip the cache, or no key could be derived
    Bypass,
    /// Not a cacheable method, or caching disabled
    PassThrough,
}

impl RequestOutcome {
    /// Value of the `X-Cache` header, if any
    pub fn header_value(&self) -> Option<&'static str> {
        match self {
            RequestOutcome::Hit(_) => Some("HIT"),
            RequestOutcome::Stored | RequestOutcome::Skipped(_) => Some("MISS"),
            RequestOutcome::Bypass => Some("BYPASS"),
            RequestOutcome::PassThrough => None,
        }
    }
}

impl fmt::Display for RequestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestOutcome::Hit(tier) => write!(f, "hit ({})", tier),
            RequestOutcome::Stored => write!(f, "stored"),
            RequestOutcome::Skipped(reason) => write!(f, "not stored: {}", reason),
            RequestOutcome::Bypass => write!(f, "bypassed"),
            RequestOutcome::PassThrough => write!(f, "passed through"),
        }
    }
}

/// Readiness of the whole layer
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub healthy: bool,
    pub tiers: Vec<TierHealth>,
    pub in_flight: u64,
}

// =============================================================================
// Builder
// =============================================================================

/// Assembles a `CacheService`
#[derive(Default)]
pub struct CacheServiceBuilder {
    config: CacheLayerConfig,
    edge_cache: Option<Arc<dyn EdgeCache>>,
    kv_store: Option<Arc<dyn KvStore>>,
    metrics_sink: Option<Arc<dyn MetricsSink>>,
}

impl CacheServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: CacheLayerConfig) -> Self {
        self.config = config;
        self
    }

    /// Edge cache backing the edge tier; without one the tier is absent
    pub fn edge_cache(mut self, edge: Arc<dyn EdgeCache>) -> Self {
        self.edge_cache = Some(edge);
        self
    }

    /// Key-value store backing the durable tier; overrides `durable.backend`
    pub fn kv_store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.kv_store = Some(store);
        self
    }

    /// Sink receiving each telemetry window the optimizer evaluates
    pub fn metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics_sink = Some(sink);
        self
    }

    pub async fn build(self) -> Result<Arc<CacheService>> {
        let config = self.config;
        config.validate()?;

        let kv_store: Arc<dyn KvStore> = match self.kv_store {
            Some(store) => store,
            None => match &config.durable {
                DurableBackend::Memory => Arc::new(InMemoryKvStore::new()),
                DurableBackend::File(file) => Arc::new(FileKvStore::with_config(file.clone()).await?),
            },
        };
        let compression = CompressionManager::with_config(config.compression.clone());
        let durable: SharedTierStorage = Arc::new(DurableTier::with_compression(kv_store, compression));
        let edge = self
            .edge_cache
            .map(|edge| Arc::new(EdgeTier::new(edge)) as SharedTierStorage);

        let knobs = Arc::new(TuningKnobs::new());
        let cache = Arc::new(TieredCache::new(config.cache.clone(), edge, Some(durable), knobs.clone()));

        let exporter = Arc::new(ServiceMetrics::new()?);
        let telemetry = Arc::new(TelemetryCollector::new(config.telemetry.clone()).with_exporter(exporter.clone()));

        let mut optimizer = Optimizer::new(config.optimizer.clone(), cache.clone(), telemetry.clone(), knobs.clone());
        if let Some(sink) = self.metrics_sink {
            optimizer = optimizer.with_sink(sink);
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(
            enabled = config.service.enabled,
            durable = durable_label(&config.durable),
            optimizer = config.optimizer.enabled,
            "Cache service built"
        );

        Ok(Arc::new(CacheService {
            keys: KeyDeriver::with_config(config.keys.clone()),
            policy: TtlPolicy::with_config(config.policy.clone()),
            router: StrategyRouter::with_config(config.strategy.clone()),
            cache,
            knobs,
            telemetry,
            optimizer: Arc::new(optimizer),
            exporter,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            config,
        }))
    }
}

fn durable_label(backend: &DurableBackend) -> &'static str {
    match backend {
        DurableBackend::Memory => "memory",
        DurableBackend::File(_) => "file",
    }
}

// =============================================================================
// Cache Service
// =============================================================================

pub struct CacheService {
    config: CacheLayerConfig,
    cache: Arc<TieredCache>,
    keys: KeyDeriver,
    policy: TtlPolicy,
    router: StrategyRouter,
    knobs: Arc<TuningKnobs>,
    telemetry: Arc<TelemetryCollector>,
    optimizer: Arc<Optimizer>,
    exporter: Arc<ServiceMetrics>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CacheService {
    pub fn builder() -> CacheServiceBuilder {
        CacheServiceBuilder::new()
    }

    pub fn config(&self) -> &CacheLayerConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub fn telemetry(&self) -> &Arc<TelemetryCollector> {
        &self.telemetry
    }

    pub fn optimizer(&self) -> &Arc<Optimizer> {
        &self.optimizer
    }

    pub fn knobs(&self) -> &Arc<TuningKnobs> {
        &self.knobs
    }

    pub fn keys(&self) -> &KeyDeriver {
        &self.keys
    }

    pub fn router(&self) -> &StrategyRouter {
        &self.router
    }

    fn strategy_context(&self) -> StrategyContext<'_> {
        StrategyContext {
            cache: &self.cache,
            policy: &self.policy,
            knobs: &self.knobs,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start background tasks (optimizer loop)
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            debug!("Cache service already started");
            return;
        }
        let optimizer = self.optimizer.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(optimizer.run(shutdown_rx)));
        info!("Cache service started");
    }

    /// Subscribe to the shutdown signal
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Stop background tasks and wait for detached writes
    pub async fn shutdown(&self) {
        info!("Shutting down cache service");
        let _ = self.shutdown_tx.send(());
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        self.cache.drain().await;
        info!("Cache service stopped");
    }

    // =========================================================================
    // Request Path
    // =========================================================================

    /// Serve a request through the cache
    pub async fn handle<H: Handler>(
        &self,
        request: Request<Bytes>,
        handler: &H,
    ) -> std::result::Result<Response<Bytes>, H::Error> {
        self.execute(request, handler).await.0
    }

    /// Serve a request through the cache and report what the cache did
    pub async fn execute<H: Handler>(
        &self,
        request: Request<Bytes>,
        handler: &H,
    ) -> (std::result::Result<Response<Bytes>, H::Error>, RequestOutcome) {
        let mut timer = self.telemetry.start(request.uri().path());

        let cacheable_method = matches!(*request.method(), Method::GET | Method::HEAD);
        if !self.config.service.enabled || !cacheable_method {
            timer.record_cache(CacheOutcome::Bypass);
            let method = request.method().clone();
            let path = request.uri().path().to_string();
            let result = handler.call(request).await;
            timer.mark("origin");
            if let Ok(response) = &result {
                if self.config.service.enabled && self.config.service.invalidate_on_write {
                    self.invalidate_after_write(&method, &path, response).await;
                }
            }
            finish_timer(timer, &result);
            return (result, RequestOutcome::PassThrough);
        }

        let strategy = self.router.route(request.uri().path());
        timer.set_category(strategy.category());

        if request_bypasses_cache(request.headers()) {
            self.cache.record_bypass(request.uri().path(), "request cache-control");
            return self.bypass(request, handler, timer).await;
        }

        let key = match self.keys.derive(
            strategy.namespace(),
            request.method(),
            request.uri(),
            request.headers(),
        ) {
            Ok(key) => key,
            Err(e) => {
                warn!(path = %request.uri().path(), error = %e, "Cache key derivation failed");
                self.cache.record_bypass(request.uri().path(), "key derivation failed");
                return self.bypass(request, handler, timer).await;
            }
        };
        timer.mark("key");

        let ctx = self.strategy_context();
        let strategy = strategy.as_strategy();
        let info = RequestInfo::from_request(&request);

        if let Some(hit) = strategy.resolve(&ctx, &key, &info).await {
            timer.mark("lookup");
            timer.record_hit(hit.tier);
            let mut response = hit.response;
            if self.config.service.emit_cache_headers {
                set_header(response.headers_mut(), X_CACHE, "HIT");
                set_header(response.headers_mut(), X_CACHE_TIER, hit.tier.as_str());
                set_header(response.headers_mut(), "age", &hit.age_secs.to_string());
            }
            if request.method() == Method::HEAD {
                *response.body_mut() = Bytes::new();
            }
            timer.complete(response.status().as_u16());
            return (Ok(response), RequestOutcome::Hit(hit.tier));
        }
        timer.mark("lookup");
        timer.record_cache(CacheOutcome::Miss);

        let method = request.method().clone();
        let uri = request.uri().clone();
        let headers = request.headers().clone();

        let result = handler.call(request).await;
        timer.mark("origin");

        let (result, outcome) = match result {
            Ok(mut response) => {
                let outcome = if method == Method::HEAD {
                    // A HEAD response has no body to replay
                    RequestOutcome::Skipped(SkipReason::NotEligible)
                } else {
                    let info = RequestInfo::new(&method, &uri, &headers);
                    match strategy.store(&ctx, &key, &info, &response) {
                        StoreOutcome::Stored { .. } => RequestOutcome::Stored,
                        StoreOutcome::Skipped(reason) => RequestOutcome::Skipped(reason),
                    }
                };
                timer.mark("store");
                if self.config.service.emit_cache_headers {
                    set_header(response.headers_mut(), X_CACHE, "MISS");
                }
                (Ok(response), outcome)
            }
            Err(e) => {
                debug!(key = %key, error = %e, "Handler failed on cache miss");
                (Err(e), RequestOutcome::Skipped(SkipReason::NotEligible))
            }
        };

        finish_timer(timer, &result);
        (result, outcome)
    }

    async fn bypass<H: Handler>(
        &self,
        request: Request<Bytes>,
        handler: &H,
        mut timer: RequestTimer,
    ) -> (std::result::Result<Response<Bytes>, H::Error>, RequestOutcome) {
        timer.record_cache(CacheOutcome::Bypass);
        let mut result = handler.call(request).await;
        timer.mark("origin");
        if let Ok(response) = result.as_mut() {
            if self.config.service.emit_cache_headers {
                set_header(response.headers_mut(), X_CACHE, "BYPASS");
            }
        }
        finish_timer(timer, &result);
        (result, RequestOutcome::Bypass)
    }

    /// Drop cached reads of a path after a successful write to it
    async fn invalidate_after_write(&self, method: &Method, path: &str, response: &Response<Bytes>) {
        if method.is_safe() || !response.status().is_success() {
            return;
        }
        let namespace = self.router.route(path).namespace();
        for read_method in ["GET", "HEAD"] {
            let prefix = self.keys.path_prefix(namespace, read_method, path);
            if let Err(e) = self.cache.invalidate(&InvalidationScope::Prefix(prefix.clone())).await {
                warn!(prefix = %prefix, error = %e, "Write-through invalidation failed");
            }
        }
    }

    // =========================================================================
    // Management
    // =========================================================================

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.cache.stats()
    }

    pub fn reset_stats(&self) {
        self.cache.reset_stats();
    }

    /// Invalidate by key, prefix or glob pattern
    pub async fn invalidate(&self, pattern: &str) -> Result<InvalidationReport> {
        let scope = InvalidationScope::parse(pattern)?;
        self.cache.invalidate(&scope).await
    }

    /// Invalidate one exact key
    pub async fn invalidate_key(&self, key: &CacheKey) -> Result<InvalidationReport> {
        self.cache.invalidate(&InvalidationScope::Key(key.clone())).await
    }

    /// Telemetry over the optimizer window
    pub fn telemetry_window(&self) -> TelemetryAggregate {
        self.telemetry.aggregate(self.optimizer.config().window())
    }

    pub fn optimizer_state(&self) -> OptimizationState {
        self.optimizer.state()
    }

    /// Prometheus text exposition
    pub fn render_metrics(&self) -> Result<String> {
        self.exporter.refresh(&self.stats(), &self.optimizer.state());
        self.exporter.render()
    }

    pub async fn health(&self) -> ServiceHealth {
        let tiers = self.cache.health_check().await;
        ServiceHealth {
            healthy: tiers.iter().all(|t| t.healthy),
            tiers,
            in_flight: self.telemetry.in_flight(),
        }
    }
}

fn finish_timer<E: fmt::Display>(
    timer: RequestTimer,
    result: &std::result::Result<Response<Bytes>, E>,
) {
    match result {
        Ok(response) => timer.complete(response.status().as_u16()),
        Err(e) => timer.fail(e.to_string()),
    }
}

fn set_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}
