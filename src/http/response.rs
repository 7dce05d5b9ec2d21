//! Response emission.
//!
//! # Responsibilities
//! - Turn a pipeline reply into an HTTP response
//! - Answer CORS preflight without touching upstream
//! - Answer unknown routes with a JSON 404
//!
//! # Design Decisions
//! - Bodies are fully buffered by the pipeline; the length is recomputed here
//! - Error bodies come from `ProxyError`'s `IntoResponse`

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::proxy::ProxyReply;
use crate::security::headers::apply_cors_headers;

impl IntoResponse for ProxyReply {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// 200, CORS headers, empty body.
pub fn preflight_response() -> Response {
    let mut headers = HeaderMap::new();
    apply_cors_headers(&mut headers);
    (StatusCode::OK, headers).into_response()
}

pub fn not_found_response() -> Response {
    let mut response = (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" }))).into_response();
    apply_cors_headers(response.headers_mut());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use bytes::Bytes;

    #[tokio::test]
    async fn reply_keeps_status_headers_and_body() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        let reply = ProxyReply {
            status: StatusCode::MOVED_PERMANENTLY,
            headers,
            body: Bytes::from_static(b"moved"),
        };

        let response = reply.into_response();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers()["content-type"], "text/plain");
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"moved");
    }

    #[tokio::test]
    async fn preflight_is_empty() {
        let response = preflight_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        assert!(response.headers().get("x-frame-options").is_none());
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert!(body.is_empty());
    }
}
