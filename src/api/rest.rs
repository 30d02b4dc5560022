//! REST API Handlers
//!
//! Management endpoints for statistics, invalidation, warming and the
//! optimizer, plus the proxy fallback for regular traffic.

use crate::cache::metrics::CacheStatsSnapshot;
use crate::error::{Error, ErrorDisposition};
use crate::handler::{CacheManagement, CachingHandler, Handler};
use crate::optimizer::KnobsSnapshot;
use crate::telemetry::TelemetryAggregate;
use axum::{
    body::Body,
    extract::{Json, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Invalidation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidateRequest {
    /// Exact key, `prefix:` or glob pattern
    pub pattern: String,
}

/// Warm request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmRequest {
    pub urls: Vec<String>,
}

/// Statistics response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub cache: CacheStatsSnapshot,
    pub telemetry: TelemetryAggregate,
    pub knobs: KnobsSnapshot,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
}

fn error_response(status: StatusCode, error: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ApiErrorResponse {
            error: error.to_string(),
            message: message.into(),
        }),
    )
        .into_response()
}

fn cache_error_response(e: &Error) -> Response {
    match e {
        Error::InvalidPattern { .. } => error_response(StatusCode::BAD_REQUEST, "invalid_pattern", e.to_string()),
        _ if e.disposition() == ErrorDisposition::DegradeToMiss => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, "tier_unavailable", e.to_string())
        }
        _ => error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e.to_string()),
    }
}

// =============================================================================
// REST Router
// =============================================================================

/// Router builder over a caching handler
pub struct RestRouter<H: Handler> {
    handler: Arc<CachingHandler<H>>,
    management_prefix: String,
    max_body_bytes: usize,
}

impl<H: Handler> RestRouter<H> {
    pub fn new(handler: Arc<CachingHandler<H>>) -> Self {
        let config = handler.service().config();
        let management_prefix = config.server.management_prefix.trim_end_matches('/').to_string();
        let max_body_bytes = config.upstream.max_body_bytes;
        Self {
            handler,
            management_prefix,
            max_body_bytes,
        }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            handler: self.handler,
            max_body_bytes: self.max_body_bytes,
        };
        let prefix = self.management_prefix;

        Router::new()
            // Management endpoints
            .route(&format!("{}/stats", prefix), get(get_stats::<H>))
            .route(&format!("{}/stats/reset", prefix), post(reset_stats::<H>))
            .route(&format!("{}/invalidate", prefix), post(invalidate::<H>))
            .route(&format!("{}/warm", prefix), post(warm::<H>))
            .route(&format!("{}/optimizer", prefix), get(get_optimizer::<H>))
            // Health and metrics
            .route("/healthz", get(liveness))
            .route("/readyz", get(readiness::<H>))
            .route("/metrics", get(metrics::<H>))
            // Everything else goes through the cache
            .fallback(proxy::<H>)
            .with_state(state)
    }
}

/// Shared application state
struct AppState<H: Handler> {
    handler: Arc<CachingHandler<H>>,
    max_body_bytes: usize,
}

impl<H: Handler> Clone for AppState<H> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            max_body_bytes: self.max_body_bytes,
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn get_stats<H: Handler>(State(state): State<AppState<H>>) -> impl IntoResponse {
    let service = state.handler.service();
    Json(StatsResponse {
        cache: state.handler.get_stats(),
        telemetry: service.telemetry_window(),
        knobs: service.knobs().snapshot(),
    })
}

async fn reset_stats<H: Handler>(State(state): State<AppState<H>>) -> impl IntoResponse {
    state.handler.reset_stats();
    info!("Cache statistics reset");
    StatusCode::NO_CONTENT
}

async fn invalidate<H: Handler>(
    State(state): State<AppState<H>>,
    Json(request): Json<InvalidateRequest>,
) -> Response {
    match state.handler.invalidate(&request.pattern).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            warn!(pattern = %request.pattern, error = %e, "Invalidation failed");
            cache_error_response(&e)
        }
    }
}

async fn warm<H: Handler>(State(state): State<AppState<H>>, Json(request): Json<WarmRequest>) -> Response {
    if request.urls.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "empty_request", "urls must not be empty");
    }
    Json(state.handler.warm(&request.urls).await).into_response()
}

async fn get_optimizer<H: Handler>(State(state): State<AppState<H>>) -> impl IntoResponse {
    Json(state.handler.service().optimizer_state())
}

async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readiness<H: Handler>(State(state): State<AppState<H>>) -> Response {
    let health = state.handler.service().health().await;
    let status = if health.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health)).into_response()
}

async fn metrics<H: Handler>(State(state): State<AppState<H>>) -> Response {
    match state.handler.service().render_metrics() {
        Ok(body) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        Err(e) => cache_error_response(&e),
    }
}

/// Serve a request through the cache
async fn proxy<H: Handler>(State(state): State<AppState<H>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body: Bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(body) => body,
        Err(e) => {
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "body_too_large", e.to_string());
        }
    };
    let request = axum::http::Request::from_parts(parts, body);

    match state.handler.call(request).await {
        Ok(response) => response.map(Body::from),
        Err(e) => {
            debug!(error = %e, "Origin request failed");
            error_response(StatusCode::BAD_GATEWAY, "upstream_error", e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{handler_fn, with_caching};
    use crate::service::CacheService;
    use axum::http::Method;
    use std::convert::Infallible;
    use tower::ServiceExt;

    async fn router() -> Router {
        let service = CacheService::builder().build().await.unwrap();
        let origin = handler_fn(|request: axum::http::Request<Bytes>| async move {
            Ok::<_, Infallible>(
                axum::http::Response::builder()
                    .header("content-type", "application/json")
                    .body(Bytes::from(format!("{{\"path\":\"{}\"}}", request.uri().path())))
                    .unwrap(),
            )
        });
        RestRouter::new(Arc::new(with_caching(origin, service))).build()
    }

    fn request(method: Method, uri: &str, body: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_fallback_serves_through_cache() {
        let app = router().await;
        let first = app.clone().oneshot(request(Method::GET, "/api/jobs/1", "")).await.unwrap();
        assert_eq!(first.headers()["x-cache"], "MISS");
        let second = app.oneshot(request(Method::GET, "/api/jobs/1", "")).await.unwrap();
        assert_eq!(second.headers()["x-cache"], "HIT");
        let body = axum::body::to_bytes(second.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"{\"path\":\"/api/jobs/1\"}");
    }

    #[tokio::test]
    async fn test_invalidate_endpoint() {
        let app = router().await;
        let ok = app
            .clone()
            .oneshot(request(Method::POST, "/_cache/invalidate", r#"{"pattern":"api:"}"#))
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        let bad = app
            .oneshot(request(Method::POST, "/_cache/invalidate", r#"{"pattern":"api:[x"}"#))
            .await
            .unwrap();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stats_and_health_endpoints() {
        let app = router().await;
        let stats = app.clone().oneshot(request(Method::GET, "/_cache/stats", "")).await.unwrap();
        assert_eq!(stats.status(), StatusCode::OK);

        let ready = app.clone().oneshot(request(Method::GET, "/readyz", "")).await.unwrap();
        assert_eq!(ready.status(), StatusCode::OK);

        let metrics = app.oneshot(request(Method::GET, "/metrics", "")).await.unwrap();
        assert_eq!(metrics.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_warm_rejects_empty_list() {
        let app = router().await;
        let response = app
            .oneshot(request(Method::POST, "/_cache/warm", r#"{"urls":[]}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
