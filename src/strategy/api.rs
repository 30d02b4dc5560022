//! API Strategy
//!
//! Structured endpoints. JSON bodies are validated before storage and kept
//! as their original bytes, so a hit replays exactly what the origin sent.

use crate::cache::entry::{CacheEntry, CachedPayload};
use crate::cache::policy::{EndpointClass, SkipReason};
use crate::strategy::{
    entry_response, is_json_media, json_payload, media_type, RequestCategory, RequestInfo, Strategy, StrategyContext,
};
use axum::http::{header, HeaderMap, HeaderValue, Response};
use bytes::Bytes;
use chrono::{DateTime, Utc};

pub struct ApiStrategy {
    metrics_segments: Vec<String>,
}

impl Default for ApiStrategy {
    fn default() -> Self {
        Self::new(vec!["metrics".to_string(), "analytics".to_string()])
    }
}

impl ApiStrategy {
    pub fn new(metrics_segments: Vec<String>) -> Self {
        Self { metrics_segments }
    }

    /// Whether any path segment names a metrics endpoint
    pub fn is_metrics_path(&self, path: &str) -> bool {
        path.split('/')
            .any(|segment| self.metrics_segments.iter().any(|m| m.eq_ignore_ascii_case(segment)))
    }
}

impl Strategy for ApiStrategy {
    fn category(&self) -> RequestCategory {
        RequestCategory::Api
    }

    fn endpoint_class(&self, request: &RequestInfo<'_>, _response_headers: &HeaderMap) -> EndpointClass {
        if self.is_metrics_path(request.path()) {
            EndpointClass::Metrics
        } else {
            EndpointClass::Structured
        }
    }

    fn payload(
        &self,
        _ctx: &StrategyContext<'_>,
        _request: &RequestInfo<'_>,
        response: &Response<Bytes>,
        _explicit: bool,
    ) -> Result<CachedPayload, SkipReason> {
        let declared_json = media_type(response.headers()).map_or(false, |m| is_json_media(&m));
        if declared_json && !response.body().is_empty() {
            json_payload(response.body())
        } else {
            Ok(CachedPayload::Bytes(response.body().clone()))
        }
    }

    fn hit_response(&self, _request: &RequestInfo<'_>, entry: &CacheEntry, _now: DateTime<Utc>) -> Response<Bytes> {
        let mut response = entry_response(entry);
        if entry.payload.is_json() && !response.headers().contains_key(header::CONTENT_TYPE) {
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        response
    }
}
