//! Upstream Origin Proxy
//!
//! Forwards requests the cache could not answer to the origin service.
//! Idempotent requests are retried with exponential backoff when the
//! connection fails; everything else is tried once.

use crate::config::UpstreamConfig;
use crate::error::{Error, Result};
use crate::handler::Handler;
use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue, Method, Request, Response, StatusCode};
use backoff::ExponentialBackoffBuilder;
use bytes::Bytes;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Headers that describe a single connection and are never forwarded
fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name,
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "host"
    )
}

/// `Handler` that forwards to the configured origin
pub struct UpstreamProxy {
    client: reqwest::Client,
    config: UpstreamConfig,
    base_url: String,
}

impl UpstreamProxy {
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            config,
        })
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// Origin URL for a request target
    pub fn target_url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.base_url, path_and_query)
    }

    async fn forward(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        let (parts, body) = request.into_parts();
        if body.len() > self.config.max_body_bytes {
            return Err(Error::Upstream(format!(
                "request body of {} bytes exceeds {}",
                body.len(),
                self.config.max_body_bytes
            )));
        }

        let target = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let url = self.target_url(target);
        let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
            .map_err(|e| Error::Upstream(format!("unsupported method {}: {}", parts.method, e)))?;

        let mut headers = reqwest::header::HeaderMap::new();
        for (name, value) in parts.headers.iter() {
            if is_hop_by_hop(name.as_str()) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
                reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
            ) {
                headers.append(name, value);
            }
        }

        let retryable = is_idempotent(&parts.method);
        let max_retries = if retryable { self.config.max_retries } else { 0 };
        let attempts = AtomicU32::new(0);
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.config.initial_backoff_ms.max(1)))
            .with_max_interval(Duration::from_millis(self.config.max_backoff_ms.max(1)))
            .with_max_elapsed_time(None)
            .build();

        let (client, url, headers, body, method, attempts) = (&self.client, &url, &headers, &body, &method, &attempts);
        let upstream = backoff::future::retry(policy, move || async move {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed);
            let result = client
                .request(method.clone(), url.as_str())
                .headers(headers.clone())
                .body(body.clone())
                .send()
                .await;
            match result {
                Ok(response) => Ok(response),
                Err(e) if e.is_connect() && attempt < max_retries => {
                    debug!(url = %url, attempt, error = %e, "Origin connection failed, retrying");
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await
        .map_err(|e| {
            warn!(url = %url, error = %e, "Origin request failed");
            Error::UpstreamConnection(e)
        })?;

        let status = StatusCode::from_u16(upstream.status().as_u16())
            .map_err(|e| Error::Upstream(format!("invalid origin status: {}", e)))?;
        let mut builder = Response::builder().status(status);
        if let Some(response_headers) = builder.headers_mut() {
            for (name, value) in upstream.headers().iter() {
                if is_hop_by_hop(name.as_str()) {
                    continue;
                }
                if let (Ok(name), Ok(value)) = (
                    HeaderName::from_bytes(name.as_str().as_bytes()),
                    HeaderValue::from_bytes(value.as_bytes()),
                ) {
                    response_headers.append(name, value);
                }
            }
        }
        let body = upstream.bytes().await?;
        builder
            .body(body)
            .map_err(|e| Error::Internal(format!("Failed to build origin response: {}", e)))
    }
}

fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE | Method::TRACE
    )
}

#[async_trait]
impl Handler for UpstreamProxy {
    type Error = Error;

    async fn call(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        self.forward(request).await
    }
}
