//! Static Asset Strategy
//!
//! Versioned assets get the longest TTL and are served as immutable for the
//! rest of their lifetime.

use crate::cache::entry::{CacheEntry, CachedPayload};
use crate::cache::policy::{EndpointClass, SkipReason};
use crate::strategy::{entry_response, RequestCategory, RequestInfo, Strategy, StrategyContext};
use axum::http::{header, HeaderMap, HeaderValue, Response};
use bytes::Bytes;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, Default)]
pub struct StaticStrategy;

impl Strategy for StaticStrategy {
    fn category(&self) -> RequestCategory {
        RequestCategory::Static
    }

    fn endpoint_class(&self, _request: &RequestInfo<'_>, _response_headers: &HeaderMap) -> EndpointClass {
        EndpointClass::Static
    }

    fn payload(
        &self,
        _ctx: &StrategyContext<'_>,
        _request: &RequestInfo<'_>,
        response: &Response<Bytes>,
        _explicit: bool,
    ) -> Result<CachedPayload, SkipReason> {
        Ok(CachedPayload::Bytes(response.body().clone()))
    }

    fn hit_response(&self, _request: &RequestInfo<'_>, entry: &CacheEntry, now: DateTime<Utc>) -> Response<Bytes> {
        let mut response = entry_response(entry);
        let directive = format!("public, max-age={}, immutable", entry.remaining_ttl_secs(now));
        if let Ok(value) = HeaderValue::from_str(&directive) {
            response.headers_mut().insert(header::CACHE_CONTROL, value);
        }
        response
    }
}
