//! Generic Strategy
//!
//! Catch-all. HTML and JSON are stored under their class TTLs, anything else
//! only when the origin sent an explicit lifetime, or when the optimizer has
//! widened store eligibility.

use crate::cache::entry::CachedPayload;
use crate::cache::policy::{EndpointClass, SkipReason};
use crate::strategy::{
    is_html_media, is_json_media, json_payload, media_type, RequestCategory, RequestInfo, Strategy, StrategyContext,
};
use axum::http::{HeaderMap, Response};
use bytes::Bytes;

#[derive(Debug, Clone, Copy, Default)]
pub struct GenericStrategy;

impl Strategy for GenericStrategy {
    fn category(&self) -> RequestCategory {
        RequestCategory::Generic
    }

    fn endpoint_class(&self, _request: &RequestInfo<'_>, response_headers: &HeaderMap) -> EndpointClass {
        match media_type(response_headers) {
            Some(media) if is_html_media(&media) => EndpointClass::Document,
            Some(media) if is_json_media(&media) => EndpointClass::Structured,
            _ => EndpointClass::Default,
        }
    }

    fn payload(
        &self,
        ctx: &StrategyContext<'_>,
        _request: &RequestInfo<'_>,
        response: &Response<Bytes>,
        explicit: bool,
    ) -> Result<CachedPayload, SkipReason> {
        let body = response.body();
        match media_type(response.headers()) {
            Some(media) if is_json_media(&media) && !body.is_empty() => {
                Ok(json_payload(body).unwrap_or_else(|_| CachedPayload::Bytes(body.clone())))
            }
            Some(media) if is_html_media(&media) || is_json_media(&media) => Ok(CachedPayload::Bytes(body.clone())),
            _ if explicit || ctx.knobs.widen_eligibility() => Ok(CachedPayload::Bytes(body.clone())),
            _ => Err(SkipReason::NotEligible),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::CacheKey;
    use crate::strategy::test_support::*;
    use crate::strategy::StoreOutcome;
    use assert_matches::assert_matches;
    use axum::http::Method;

    fn store(h: &Harness, path: &'static str, response: Response<Bytes>) -> StoreOutcome {
        let method = Method::GET;
        let headers = HeaderMap::new();
        let uri = uri(path);
        let request = RequestInfo::new(&method, &uri, &headers);
        let key = CacheKey::from_raw(format!("generic:GET:{}", path));
        GenericStrategy.store(&h.ctx(), &key, &request, &response)
    }

    #[tokio::test]
    async fn test_html_and_json_use_their_class_ttls() {
        let h = Harness::new();
        assert_matches!(
            store(&h, "/", response(200, &[("content-type", "text/html; charset=utf-8")], b"<p>hi</p>")),
            StoreOutcome::Stored { ttl_secs: 180, .. }
        );
        assert_matches!(
            store(&h, "/status", response(200, &[("content-type", "application/json")], b"{}")),
            StoreOutcome::Stored { ttl_secs: 300, .. }
        );
    }

    #[tokio::test]
    async fn test_other_content_needs_directive_or_widening() {
        let h = Harness::new();
        assert_eq!(
            store(&h, "/feed", response(200, &[("content-type", "text/plain")], b"x")),
            StoreOutcome::Skipped(SkipReason::NotEligible)
        );
        assert_matches!(
            store(
                &h,
                "/feed",
                response(200, &[("content-type", "text/plain"), ("cache-control", "max-age=42")], b"x")
            ),
            StoreOutcome::Stored { ttl_secs: 42, .. }
        );

        h.knobs.set_widen_eligibility(true);
        assert_matches!(
            store(&h, "/robots", response(200, &[("content-type", "text/plain")], b"x")),
            StoreOutcome::Stored { ttl_secs: 300, .. }
        );
    }
}
