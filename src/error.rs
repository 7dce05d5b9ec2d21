//! Request-scoped error taxonomy.
//!
//! Every variant maps to exactly one HTTP status and a JSON body of the form
//! `{"error": ..., "kind": ..., "details": ...}`. Nothing here is fatal to the
//! process; an error only ever terminates the request that produced it.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::security::headers::apply_cors_headers;

/// Failure of a single proxy request.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("URL parameter is required")]
    MissingUrl,

    #[error("Invalid URL provided")]
    InvalidUrl(String),

    #[error("Only HTTP and HTTPS URLs are allowed")]
    UnsupportedScheme(String),

    #[error("Request timeout")]
    UpstreamTimeout(String),

    #[error("Too many redirects")]
    TooManyRedirects(String),

    #[error("Website not found")]
    HostNotFound(String),

    #[error("Connection refused")]
    ConnectionRefused(String),

    #[error("HTTP {}: {}", .0.as_u16(), .0.canonical_reason().unwrap_or("Unknown"))]
    UpstreamHttp(StatusCode),

    #[error("Upstream request failed")]
    UpstreamFailure(String),

    #[error("Upstream body too large")]
    BodyTooLarge(usize),
}

impl ProxyError {
    /// Stable identifier reported as `kind` in the JSON body.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::MissingUrl => "MissingURL",
            ProxyError::InvalidUrl(_) => "InvalidURL",
            ProxyError::UnsupportedScheme(_) => "UnsupportedScheme",
            ProxyError::UpstreamTimeout(_) => "UpstreamTimeout",
            ProxyError::TooManyRedirects(_) => "TooManyRedirects",
            ProxyError::HostNotFound(_) => "HostNotFound",
            ProxyError::ConnectionRefused(_) => "ConnectionRefused",
            ProxyError::UpstreamHttp(_) => "UpstreamHTTPError",
            ProxyError::UpstreamFailure(_) => "UpstreamFailure",
            ProxyError::BodyTooLarge(_) => "BodyTooLarge",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingUrl | ProxyError::InvalidUrl(_) | ProxyError::UnsupportedScheme(_) => {
                StatusCode::BAD_REQUEST
            }
            ProxyError::HostNotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::UpstreamTimeout(_) => StatusCode::REQUEST_TIMEOUT,
            ProxyError::ConnectionRefused(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::UpstreamHttp(status) => *status,
            ProxyError::TooManyRedirects(_)
            | ProxyError::UpstreamFailure(_)
            | ProxyError::BodyTooLarge(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Extra context for the caller, if any.
    pub fn details(&self) -> Option<String> {
        match self {
            ProxyError::MissingUrl | ProxyError::UpstreamHttp(_) => None,
            ProxyError::InvalidUrl(d)
            | ProxyError::UnsupportedScheme(d)
            | ProxyError::UpstreamTimeout(d)
            | ProxyError::TooManyRedirects(d)
            | ProxyError::HostNotFound(d)
            | ProxyError::ConnectionRefused(d)
            | ProxyError::UpstreamFailure(d) => Some(d.clone()),
            ProxyError::BodyTooLarge(limit) => Some(format!("limit is {} bytes", limit)),
        }
    }

    /// True for rejections that happen before any network activity.
    pub fn is_validation(&self) -> bool {
        self.status() == StatusCode::BAD_REQUEST
    }
}

/// JSON body returned for every failed request.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
            kind: self.kind(),
            details: self.details(),
        };
        let mut response = (self.status(), Json(body)).into_response();
        apply_cors_headers(response.headers_mut());
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_bad_request() {
        assert_eq!(ProxyError::MissingUrl.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ProxyError::InvalidUrl("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ProxyError::UnsupportedScheme("ftp".into()).status(), StatusCode::BAD_REQUEST);
        assert!(ProxyError::MissingUrl.is_validation());
        assert!(!ProxyError::HostNotFound("x".into()).is_validation());
    }

    #[test]
    fn network_errors_map_to_distinct_statuses() {
        assert_eq!(ProxyError::HostNotFound("dns".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ProxyError::ConnectionRefused("refused".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ProxyError::UpstreamTimeout("slow".into()).status(),
            StatusCode::REQUEST_TIMEOUT
        );
        assert_eq!(ProxyError::TooManyRedirects("loop".into()).status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn upstream_http_status_passes_through() {
        let err = ProxyError::UpstreamHttp(StatusCode::FORBIDDEN);
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.to_string(), "HTTP 403: Forbidden");
        assert_eq!(err.kind(), "UpstreamHTTPError");
        assert!(err.details().is_none());
    }

    #[test]
    fn error_response_carries_cors_headers() {
        let response = ProxyError::HostNotFound("no such host".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }
}
