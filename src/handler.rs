//! Handler Contract
//!
//! A `Handler` turns a request into a response. `with_caching` wraps any
//! handler in a `CachingHandler` with the same error type, so callers see
//! the same contract with or without the cache in front.

use crate::cache::metrics::CacheStatsSnapshot;
use crate::cache::orchestrator::InvalidationReport;
use crate::error::Result;
use crate::service::{CacheService, RequestOutcome};
use async_trait::async_trait;
use axum::http::{Method, Request, Response, Uri};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info};

// =============================================================================
// Handler
// =============================================================================

#[async_trait]
pub trait Handler: Send + Sync + 'static {
    type Error: fmt::Display + Send + 'static;

    async fn call(&self, request: Request<Bytes>) -> std::result::Result<Response<Bytes>, Self::Error>;
}

/// Handler backed by an async function
pub struct FnHandler<F, E> {
    f: F,
    _error: PhantomData<fn() -> E>,
}

/// Wrap an async function as a `Handler`
pub fn handler_fn<F, Fut, E>(f: F) -> FnHandler<F, E>
where
    F: Fn(Request<Bytes>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Response<Bytes>, E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    FnHandler { f, _error: PhantomData }
}

#[async_trait]
impl<F, Fut, E> Handler for FnHandler<F, E>
where
    F: Fn(Request<Bytes>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Response<Bytes>, E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    type Error = E;

    async fn call(&self, request: Request<Bytes>) -> std::result::Result<Response<Bytes>, E> {
        (self.f)(request).await
    }
}

#[async_trait]
impl<H: Handler> Handler for Arc<H> {
    type Error = H::Error;

    async fn call(&self, request: Request<Bytes>) -> std::result::Result<Response<Bytes>, Self::Error> {
        self.as_ref().call(request).await
    }
}

// =============================================================================
// Caching Handler
// =============================================================================

/// A handler with the cache in front of it
pub struct CachingHandler<H> {
    inner: H,
    service: Arc<CacheService>,
}

/// Put `service` in front of `handler`
pub fn with_caching<H: Handler>(handler: H, service: Arc<CacheService>) -> CachingHandler<H> {
    CachingHandler {
        inner: handler,
        service,
    }
}

impl<H: Handler> CachingHandler<H> {
    pub fn service(&self) -> &Arc<CacheService> {
        &self.service
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }

    /// Handle a request and report how the cache treated it
    pub async fn call_with_outcome(
        &self,
        request: Request<Bytes>,
    ) -> (std::result::Result<Response<Bytes>, H::Error>, RequestOutcome) {
        self.service.execute(request, &self.inner).await
    }
}

#[async_trait]
impl<H: Handler> Handler for CachingHandler<H> {
    type Error = H::Error;

    async fn call(&self, request: Request<Bytes>) -> std::result::Result<Response<Bytes>, H::Error> {
        self.service.execute(request, &self.inner).await.0
    }
}

// =============================================================================
// Cache Management
// =============================================================================

/// Outcome of warming a set of URLs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarmReport {
    pub requested: usize,
    pub warmed: usize,
    pub already_cached: usize,
    pub failed: usize,
    pub failures: Vec<WarmFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarmFailure {
    pub url: String,
    pub reason: String,
}

/// Operator controls
#[async_trait]
pub trait CacheManagement: Send + Sync {
    fn get_stats(&self) -> CacheStatsSnapshot;

    fn reset_stats(&self);

    /// Invalidate by key prefix or glob pattern
    async fn invalidate(&self, pattern: &str) -> Result<InvalidationReport>;

    /// Fetch URLs through the cache so later requests hit
    async fn warm(&self, urls: &[String]) -> WarmReport;
}

#[async_trait]
impl<H: Handler> CacheManagement for CachingHandler<H> {
    fn get_stats(&self) -> CacheStatsSnapshot {
        self.service.stats()
    }

    fn reset_stats(&self) {
        self.service.reset_stats();
    }

    async fn invalidate(&self, pattern: &str) -> Result<InvalidationReport> {
        self.service.invalidate(pattern).await
    }

    async fn warm(&self, urls: &[String]) -> WarmReport {
        let concurrency = self.service.config().service.warm_concurrency.max(1);
        let results: Vec<(String, std::result::Result<RequestOutcome, String>)> = stream::iter(urls.iter().cloned())
            .map(|url| async move {
                let outcome = self.warm_one(&url).await;
                (url, outcome)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut report = WarmReport {
            requested: urls.len(),
            ..Default::default()
        };
        for (url, result) in results {
            match result {
                Ok(RequestOutcome::Hit(_)) => report.already_cached += 1,
                Ok(RequestOutcome::Stored) => report.warmed += 1,
                Ok(other) => {
                    report.failed += 1;
                    report.failures.push(WarmFailure {
                        url,
                        reason: other.to_string(),
                    });
                }
                Err(reason) => {
                    report.failed += 1;
                    report.failures.push(WarmFailure { url, reason });
                }
            }
        }
        info!(
            requested = report.requested,
            warmed = report.warmed,
            already_cached = report.already_cached,
            failed = report.failed,
            "Cache warm finished"
        );
        report
    }
}

impl<H: Handler> CachingHandler<H> {
    async fn warm_one(&self, url: &str) -> std::result::Result<RequestOutcome, String> {
        let uri = warm_target(url)?;
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Bytes::new())
            .map_err(|e| e.to_string())?;
        let (result, outcome) = self.call_with_outcome(request).await;
        match result {
            Ok(response) if response.status().is_success() => Ok(outcome),
            Ok(response) => Err(format!("origin returned {}", response.status())),
            Err(e) => {
                debug!(url, error = %e, "Warm request failed");
                Err(e.to_string())
            }
        }
    }
}

/// Path and query of a warm URL (absolute URLs are reduced to their target)
fn warm_target(url: &str) -> std::result::Result<Uri, String> {
    let uri: Uri = url.parse().map_err(|e| format!("invalid url: {}", e))?;
    let target = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    if !target.starts_with('/') {
        return Err(format!("invalid url: {}", url));
    }
    target.parse().map_err(|e| format!("invalid url: {}", e))
}
