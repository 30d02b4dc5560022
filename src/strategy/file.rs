//! File Strategy
//!
//! File and blob endpoints. Bodies are stored as raw bytes. Content
//! sub-resources (`/download`, `/content`) carry the file bytes and run under
//! the `LargeBlob` profile so they never occupy the memory tier.

use crate::cache::entry::{CacheEntry, CachedPayload};
use crate::cache::keys::primary_media_type;
use crate::cache::policy::{EndpointClass, SkipReason};
use crate::cache::tier::WorkloadProfile;
use crate::strategy::{entry_response, RequestCategory, RequestInfo, Strategy, StrategyContext};
use axum::http::{header, HeaderMap, HeaderValue, Response};
use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Fallback when nothing better is known
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub struct FileStrategy {
    content_subresources: Vec<String>,
}

impl Default for FileStrategy {
    fn default() -> Self {
        Self::new(vec!["download".to_string(), "content".to_string()])
    }
}

impl FileStrategy {
    pub fn new(content_subresources: Vec<String>) -> Self {
        Self { content_subresources }
    }

    /// Whether the path addresses file bytes
    pub fn is_content_request(&self, path: &str) -> bool {
        let last = path.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
        self.content_subresources.iter().any(|s| s.eq_ignore_ascii_case(last))
    }

    /// Content type for a hit: stored header, then extension, then `Accept`
    pub fn content_type_for(&self, request: &RequestInfo<'_>, entry: &CacheEntry) -> String {
        if let Some(stored) = entry.content_type.as_deref() {
            return stored.to_string();
        }
        if let Some(guessed) = mime_guess::from_path(request.path()).first_raw() {
            return guessed.to_string();
        }
        request
            .headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .and_then(primary_media_type)
            .filter(|media| !media.contains('*'))
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
    }
}

impl Strategy for FileStrategy {
    fn category(&self) -> RequestCategory {
        RequestCategory::File
    }

    fn profile(&self, request: &RequestInfo<'_>) -> WorkloadProfile {
        if self.is_content_request(request.path()) {
            WorkloadProfile::LargeBlob
        } else {
            WorkloadProfile::Standard
        }
    }

    fn endpoint_class(&self, request: &RequestInfo<'_>, _response_headers: &HeaderMap) -> EndpointClass {
        if self.is_content_request(request.path()) {
            EndpointClass::FileContent
        } else {
            EndpointClass::FileMetadata
        }
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

    fn hit_response(&self, request: &RequestInfo<'_>, entry: &CacheEntry, _now: DateTime<Utc>) -> Response<Bytes> {
        let mut response = entry_response(entry);
        if !response.headers().contains_key(header::CONTENT_TYPE) {
            if let Ok(value) = HeaderValue::from_str(&self.content_type_for(request, entry)) {
                response.headers_mut().insert(header::CONTENT_TYPE, value);
            }
        }
        response
    }
}
