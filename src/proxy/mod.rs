//! Embedding proxy pipeline.
//!
//! # Data Flow
//! ```text
//! ProxyRequest
//!     → validator.rs (absolute http/https URL, origin)
//!     → fetcher.rs (single GET, redirects, deadline)
//!     → rewriter.rs (HTML only: URLs, <base>, neutralizer, meta, scripts)
//!     → security::headers (strip framing denials, inject permissive set)
//!     → ProxyReply (status, headers, body)
//! ```
//!
//! # States
//! ```text
//! Received → Validating → Fetching → (Rewriting) → Sanitizing → Emitted
//!     any stage → Failed(kind)
//! ```
//!
//! Nothing survives between requests.

pub mod fetcher;
pub mod neutralizer;
pub mod rewriter;
pub mod signatures;
pub mod validator;

use std::fmt;

use axum::http::header::LOCATION;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use bytes::Bytes;
use serde::Deserialize;

use crate::config::RewriteConfig;
use crate::error::ProxyError;
use crate::security::headers::sanitize_headers;

pub use fetcher::{Fetcher, UpstreamResponse};
pub use rewriter::{rewrite_html, RewriteContext, RewriteError, RewriteStats};
pub use validator::{validate_target, Target};

/// How the caller wants the body treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// Rewrite HTML bodies, pass everything else through.
    #[default]
    Html,
    /// Never rewrite; only headers are sanitized.
    Raw,
}

impl Format {
    /// Parse the `format` hint. Unknown hints fall back to the default.
    pub fn from_hint(hint: Option<&str>) -> Self {
        match hint.map(str::trim) {
            Some(h) if h.eq_ignore_ascii_case("raw") => Format::Raw,
            _ => Format::Html,
        }
    }
}

/// Query parameters of a proxy call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyRequest {
    pub url: Option<String>,
    pub format: Option<String>,
}

impl ProxyRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            format: None,
        }
    }

    pub fn format(&self) -> Format {
        Format::from_hint(self.format.as_deref())
    }
}

/// Per-request pipeline stage, used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Validating,
    Fetching,
    Rewriting,
    Sanitizing,
    Emitted,
    Failed(&'static str),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Received => write!(f, "received"),
            Stage::Validating => write!(f, "validating"),
            Stage::Fetching => write!(f, "fetching"),
            Stage::Rewriting => write!(f, "rewriting"),
            Stage::Sanitizing => write!(f, "sanitizing"),
            Stage::Emitted => write!(f, "emitted"),
            Stage::Failed(kind) => write!(f, "failed({})", kind),
        }
    }
}

/// A response ready to hand to the caller.
#[derive(Debug, Clone)]
pub struct ProxyReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Run one request through the pipeline.
pub async fn execute(
    fetcher: &Fetcher,
    rewrite: &RewriteConfig,
    request: &ProxyRequest,
) -> Result<ProxyReply, ProxyError> {
    let mut stage = Stage::Received;
    let result = run_stages(fetcher, rewrite, request, &mut stage).await;
    match &result {
        Ok(reply) => {
            tracing::debug!(stage = %Stage::Emitted, status = %reply.status, bytes = reply.body.len(), "Proxy response ready");
        }
        Err(e) => {
            tracing::debug!(stage = %Stage::Failed(e.kind()), failed_in = %stage, error = %e, "Proxy request failed");
        }
    }
    result
}

async fn run_stages(
    fetcher: &Fetcher,
    rewrite: &RewriteConfig,
    request: &ProxyRequest,
    stage: &mut Stage,
) -> Result<ProxyReply, ProxyError> {
    advance(stage, Stage::Validating);
    let raw = request.url.as_deref().ok_or(ProxyError::MissingUrl)?;
    let target = validate_target(raw)?;

    advance(stage, Stage::Fetching);
    let upstream = fetcher.fetch(&target).await?;

    let mut body = upstream.body.clone();
    if rewrite.enabled && request.format() == Format::Html {
        advance(stage, Stage::Rewriting);
        let ctx = RewriteContext::new(upstream.origin())
            .with_script(rewrite.inject_script)
            .with_memory_limit(rewrite.max_memory_bytes);
        body = rewriter::rewrite_or_original(body, upstream.content_type(), &ctx);
    }

    advance(stage, Stage::Sanitizing);
    let origin = upstream.origin();
    let UpstreamResponse { status, mut headers, .. } = upstream;
    sanitize_headers(&mut headers);
    if status.is_redirection() {
        absolutize_location(&mut headers, &origin);
    }

    Ok(ProxyReply {
        status,
        headers,
        body,
    })
}

/// Anchor a root-relative `Location` to the upstream origin, so a redirect
/// that was not followed leads back to the upstream rather than the proxy.
fn absolutize_location(headers: &mut HeaderMap, origin: &str) {
    let Some(location) = headers.get(LOCATION).and_then(|v| v.to_str().ok()) else {
        return;
    };
    if !rewriter::is_root_relative(location) {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(&format!("{}{}", origin, location)) {
        headers.insert(LOCATION, value);
    }
}

fn advance(stage: &mut Stage, next: Stage) {
    tracing::trace!(from = %stage, to = %next, "Pipeline transition");
    *stage = next;
}
