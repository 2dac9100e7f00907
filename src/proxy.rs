//! The proxy forwarder: relays a verified request to the upstream resource.
//!
//! Once the gate grants a request, the forwarder executes it against the
//! upstream API and relays the response. It owns the header hygiene (hop-by
//! -hop headers never cross the proxy in either direction), an optional
//! bounded retry policy for transient upstream failures, and an optional
//! short-lived response cache keyed by request signature. The cache is
//! best-effort only: upstream state may have changed, and losing or racing
//! an entry costs nothing but a redundant call.

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::time::Duration;
use url::Url;

use crate::cache::TtlCache;
use crate::gate::{HEADER_PAYMENT, HEADER_PAYMENT_PROOF, HEADER_PAYMENT_RESPONSE};

/// Request headers that never reach the upstream: hop-by-hop transport
/// headers plus the payment headers the gate has already consumed.
const REQUEST_HEADERS_TO_STRIP: &[&str] = &[
    "host",
    "connection",
    "content-length",
    "keep-alive",
    "transfer-encoding",
    HEADER_PAYMENT,
    HEADER_PAYMENT_PROOF,
];

/// Response headers that never reach the client: the proxy re-frames the
/// body itself.
const RESPONSE_HEADERS_TO_STRIP: &[&str] = &[
    "content-encoding",
    "transfer-encoding",
    "connection",
    "keep-alive",
];

/// Maximum relayed response body size (10 MB).
const MAX_RESPONSE_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Bounded exponential-backoff retry for transient upstream failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Backoff unit: the pause before retry `n` is `backoff_base * 2^n`.
    /// Production callers keep the one-second default.
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff_base: Duration::from_secs(1),
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.backoff_base * 2u32.saturating_pow(attempt)
    }
}

/// The relayed upstream response.
///
/// Any upstream status is carried through as-is; `success` mirrors 2xx.
/// A non-2xx upstream answer is relayed with its original status rather
/// than collapsed to a gateway 500.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub success: bool,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub data: Bytes,
}

/// Transport-level forwarding failures (the upstream was never reached, or
/// its response could not be relayed).
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("invalid upstream URL: {0}")]
    InvalidUrl(String),
    #[error("upstream request failed: {0}")]
    Upstream(#[source] reqwest::Error),
    #[error("upstream response exceeds {MAX_RESPONSE_BODY_SIZE} bytes")]
    BodyTooLarge,
    #[error("failed to read upstream response: {0}")]
    BodyRead(#[source] reqwest::Error),
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    method: String,
    url: String,
    body_digest: [u8; 32],
}

/// Forwards verified requests to upstream resources.
pub struct ProxyForwarder {
    client: Client,
    cache: Option<TtlCache<CacheKey, ProxyResponse>>,
    timeout: Duration,
}

impl ProxyForwarder {
    /// Default upstream call timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new() -> Self {
        Self {
            client: Client::new(),
            cache: None,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Enables the best-effort response cache with the given entry TTL.
    pub fn with_cache(mut self, ttl: Duration) -> Self {
        self.cache = Some(TtlCache::new(ttl));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Forwards a request to `upstream` joined with `path_and_query`.
    ///
    /// `payment_response` is the `x-payment-response` descriptor attached
    /// to the relayed response when the request was paid.
    #[allow(clippy::too_many_arguments)]
    pub async fn forward(
        &self,
        upstream: &Url,
        path_and_query: &str,
        method: Method,
        headers: &HeaderMap,
        body: Bytes,
        payment_response: Option<&str>,
        retry: Option<&RetryPolicy>,
    ) -> Result<ProxyResponse, ProxyError> {
        let target = join_upstream(upstream, path_and_query)?;

        let cache_key = self.cache.as_ref().map(|_| CacheKey {
            method: method.to_string(),
            url: target.to_string(),
            body_digest: Sha256::digest(&body).into(),
        });
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(mut cached) = cache.get(key) {
                tracing::debug!(url = %target, "proxy cache hit");
                attach_payment_response(&mut cached.headers, payment_response);
                return Ok(cached);
            }
        }

        let mut response = self
            .send_with_retry(&target, &method, headers, &body, retry)
            .await?;

        attach_payment_response(&mut response.headers, payment_response);

        if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
            // Cached without the payment descriptor; each hit re-attaches
            // its own.
            let mut to_cache = response.clone();
            to_cache.headers.remove(HEADER_PAYMENT_RESPONSE);
            cache.insert(key, to_cache);
        }

        Ok(response)
    }

    async fn send_with_retry(
        &self,
        target: &Url,
        method: &Method,
        headers: &HeaderMap,
        body: &Bytes,
        retry: Option<&RetryPolicy>,
    ) -> Result<ProxyResponse, ProxyError> {
        let max_attempts = retry.map(|r| r.max_attempts.max(1)).unwrap_or(1);
        let mut attempt = 0;
        loop {
            match self.send_once(target, method, headers, body).await {
                Ok(response) if is_transient_status(response.status) && attempt + 1 < max_attempts => {
                    tracing::warn!(
                        url = %target,
                        status = response.status.as_u16(),
                        attempt,
                        "transient upstream status, retrying"
                    );
                }
                Ok(response) => return Ok(response),
                Err(ProxyError::Upstream(err)) if attempt + 1 < max_attempts => {
                    tracing::warn!(url = %target, error = %err, attempt, "upstream unreachable, retrying");
                }
                Err(err) => return Err(err),
            }
            if let Some(policy) = retry {
                tokio::time::sleep(policy.delay(attempt)).await;
            }
            attempt += 1;
        }
    }

    async fn send_once(
        &self,
        target: &Url,
        method: &Method,
        headers: &HeaderMap,
        body: &Bytes,
    ) -> Result<ProxyResponse, ProxyError> {
        let mut request = self
            .client
            .request(method.clone(), target.clone())
            .timeout(self.timeout);

        for (name, value) in headers {
            if !REQUEST_HEADERS_TO_STRIP.contains(&name.as_str()) {
                request = request.header(name, value);
            }
        }
        if !body.is_empty() {
            request = request.body(body.clone());
        }

        let mut response = request.send().await.map_err(ProxyError::Upstream)?;

        let status = response.status();
        let mut relayed_headers = HeaderMap::new();
        for (name, value) in response.headers() {
            if !RESPONSE_HEADERS_TO_STRIP.contains(&name.as_str()) {
                relayed_headers.insert(name.clone(), value.clone());
            }
        }

        if let Some(length) = response.content_length() {
            if length > MAX_RESPONSE_BODY_SIZE as u64 {
                return Err(ProxyError::BodyTooLarge);
            }
        }

        // Stream with progressive size enforcement so a chunked response
        // without Content-Length cannot exhaust memory.
        let mut buffer = Vec::with_capacity(
            response
                .content_length()
                .map(|l| l as usize)
                .unwrap_or(8192)
                .min(MAX_RESPONSE_BODY_SIZE),
        );
        while let Some(chunk) = response.chunk().await.map_err(ProxyError::BodyRead)? {
            if buffer.len() + chunk.len() > MAX_RESPONSE_BODY_SIZE {
                return Err(ProxyError::BodyTooLarge);
            }
            buffer.extend_from_slice(&chunk);
        }

        Ok(ProxyResponse {
            success: status.is_success(),
            status,
            headers: relayed_headers,
            data: Bytes::from(buffer),
        })
    }
}

impl Default for ProxyForwarder {
    fn default() -> Self {
        Self::new()
    }
}

fn join_upstream(upstream: &Url, path_and_query: &str) -> Result<Url, ProxyError> {
    let relative = path_and_query.trim_start_matches('/');
    upstream
        .join(relative)
        .map_err(|e| ProxyError::InvalidUrl(format!("{upstream} + {path_and_query}: {e}")))
}

fn attach_payment_response(headers: &mut HeaderMap, payment_response: Option<&str>) {
    if let Some(descriptor) = payment_response {
        if let Ok(value) = HeaderValue::from_str(descriptor) {
            headers.insert(HEADER_PAYMENT_RESPONSE, value);
        }
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}
