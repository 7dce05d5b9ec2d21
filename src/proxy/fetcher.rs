//! Upstream fetching.
//!
//! # Responsibilities
//! - Issue a single GET with a browser-like header set
//! - Follow redirects up to the configured bound
//! - Enforce the hard deadline and the body size limit
//! - Translate transport failures into the error taxonomy
//!
//! # Design Decisions
//! - One attempt only; retries are the caller's business
//! - Compressed bodies are decoded by the client so the rewriter sees text;
//!   the client also owns `Accept-Encoding`
//! - 4xx/5xx are reported as `UpstreamHttp` with the upstream status

use std::error::Error as StdError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::StatusCode;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use reqwest::redirect::Policy;
use url::Url;

use crate::config::UpstreamConfig;
use crate::error::ProxyError;
use crate::observability::metrics;
use crate::proxy::validator::{origin_of, Target};
use crate::resilience::with_deadline;
use crate::security::FetchLimiter;

const ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8";

/// What came back from the upstream site.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// URL after redirects; root-relative references resolve against it.
    pub final_url: Url,
}

impl UpstreamResponse {
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    pub fn origin(&self) -> String {
        origin_of(&self.final_url)
    }
}

/// Outbound HTTP client with the proxy's fetch policy baked in.
#[derive(Debug)]
pub struct Fetcher {
    client: reqwest::Client,
    config: UpstreamConfig,
    limiter: FetchLimiter,
    fetches: AtomicU64,
}

impl Fetcher {
    pub fn new(config: &UpstreamConfig) -> Result<Self, reqwest::Error> {
        Self::with_limiter(config, FetchLimiter::new(config.max_concurrent_fetches))
    }

    /// Build a fetcher drawing slots from an existing pool.
    pub fn with_limiter(config: &UpstreamConfig, limiter: FetchLimiter) -> Result<Self, reqwest::Error> {
        let redirect = if config.max_redirects == 0 {
            Policy::none()
        } else {
            Policy::limited(config.max_redirects)
        };

        let client = reqwest::Client::builder()
            .default_headers(browser_headers(config))
            .redirect(redirect)
            .connect_timeout(config.timeout())
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            config: config.clone(),
            limiter,
            fetches: AtomicU64::new(0),
        })
    }

    /// Number of outbound fetches started since creation.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    pub fn limiter(&self) -> &FetchLimiter {
        &self.limiter
    }

    /// Fetch `target`, buffering the whole body.
    pub async fn fetch(&self, target: &Target) -> Result<UpstreamResponse, ProxyError> {
        let start = Instant::now();
        let result = with_deadline(self.config.timeout(), async {
            let _permit = self.limiter.acquire().await;
            self.fetches.fetch_add(1, Ordering::Relaxed);
            self.fetch_once(target).await
        })
        .await;

        let outcome = match &result {
            Ok(response) => status_class(response.status),
            Err(e) => e.kind(),
        };
        metrics::record_fetch(outcome, start);
        result
    }

    async fn fetch_once(&self, target: &Target) -> Result<UpstreamResponse, ProxyError> {
        tracing::debug!(url = %target.url, "Fetching upstream");

        let mut response = self
            .client
            .get(target.url.clone())
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let final_url = response.url().clone();
        if final_url != target.url {
            tracing::debug!(from = %target.url, to = %final_url, "Followed redirects");
        }

        if status.is_client_error() || status.is_server_error() {
            tracing::info!(url = %final_url, status = %status, "Upstream returned an error status");
            return Err(ProxyError::UpstreamHttp(status));
        }

        let limit = self.config.max_body_bytes;
        if response.content_length().is_some_and(|len| len > limit as u64) {
            return Err(ProxyError::BodyTooLarge(limit));
        }

        let headers = std::mem::take(response.headers_mut());
        let mut stream = response.bytes_stream();
        let mut body = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(classify)?;
            if body.len() + chunk.len() > limit {
                return Err(ProxyError::BodyTooLarge(limit));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(UpstreamResponse {
            status,
            headers,
            body: body.freeze(),
            final_url,
        })
    }
}

fn browser_headers(config: &UpstreamConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let user_agent = HeaderValue::from_str(&config.user_agent)
        .unwrap_or_else(|_| HeaderValue::from_static("Mozilla/5.0"));
    let accept_language = HeaderValue::from_str(&config.accept_language)
        .unwrap_or_else(|_| HeaderValue::from_static("en-US,en;q=0.9"));

    headers.insert(header::USER_AGENT, user_agent);
    headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT));
    headers.insert(header::ACCEPT_LANGUAGE, accept_language);
    headers.insert(header::DNT, HeaderValue::from_static("1"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
    headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
    headers.insert("sec-fetch-site", HeaderValue::from_static("none"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    headers
}

fn status_class(status: StatusCode) -> &'static str {
    if status.is_success() {
        "2xx"
    } else if status.is_redirection() {
        "3xx"
    } else {
        "other"
    }
}

/// Map a client error onto the taxonomy.
fn classify(err: reqwest::Error) -> ProxyError {
    let details = error_chain(&err);

    if err.is_timeout() {
        return ProxyError::UpstreamTimeout(details);
    }
    if err.is_redirect() {
        return ProxyError::TooManyRedirects(details);
    }
    if is_connection_refused(&err) {
        return ProxyError::ConnectionRefused(details);
    }
    if is_dns_failure(&details) {
        return ProxyError::HostNotFound(details);
    }
    ProxyError::UpstreamFailure(details)
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        parts.push(cause.to_string());
        source = cause.source();
    }
    parts.join(": ")
}

fn is_connection_refused(err: &(dyn StdError + 'static)) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        source = cause.source();
    }
    false
}

fn is_dns_failure(details: &str) -> bool {
    const MARKERS: &[&str] = &[
        "dns error",
        "failed to lookup address",
        "name or service not known",
        "nodename nor servname",
        "no such host",
        "temporary failure in name resolution",
    ];
    let lower = details.to_ascii_lowercase();
    MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn browser_headers_complete() {
        let headers = browser_headers(&UpstreamConfig::default());
        for name in [
            "user-agent",
            "accept",
            "accept-language",
            "dnt",
            "connection",
            "upgrade-insecure-requests",
        ] {
            assert!(headers.contains_key(name), "missing {name}");
        }
        assert!(headers["user-agent"].to_str().unwrap().starts_with("Mozilla/5.0"));
    }

    #[test]
    fn invalid_user_agent_falls_back() {
        let config = UpstreamConfig {
            user_agent: "bad\nagent".into(),
            ..UpstreamConfig::default()
        };
        let headers = browser_headers(&config);
        assert_eq!(headers["user-agent"], "Mozilla/5.0");
    }

    #[test]
    fn dns_markers_detected() {
        assert!(is_dns_failure(
            "error sending request: client error (Connect): dns error: failed to lookup address information: Name or service not known"
        ));
        assert!(!is_dns_failure("connection reset by peer"));
    }

    #[test]
    fn refused_io_error_detected() {
        let err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(is_connection_refused(&err));
        let err = std::io::Error::new(std::io::ErrorKind::Other, "other");
        assert!(!is_connection_refused(&err));
    }

    #[test]
    fn fresh_fetcher_has_no_fetches() {
        let fetcher = Fetcher::new(&UpstreamConfig::default()).unwrap();
        assert_eq!(fetcher.fetch_count(), 0);
        assert_eq!(fetcher.limiter().available(), 256);
    }
}
