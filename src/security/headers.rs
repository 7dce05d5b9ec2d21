//! Header manipulation for embeddable responses.
//!
//! # Responsibilities
//! - Strip every upstream header that blocks framing or cross-origin use
//! - Strip hop-by-hop headers and body framing invalidated by decoding
//! - Inject the permissive framing, CORS and no-cache header set
//!
//! # Design Decisions
//! - Two phases, strip then inject; injected values always win
//! - `Content-Type` is never touched
//! - Lookups are case-insensitive because `HeaderName` is lowercase

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};

/// Upstream headers that prevent embedding or cross-origin use.
pub const BLOCKING_HEADERS: &[&str] = &[
    "x-frame-options",
    "content-security-policy",
    "x-content-security-policy",
    "x-webkit-csp",
    "x-content-type-options",
    "x-xss-protection",
    "referrer-policy",
    "feature-policy",
    "permissions-policy",
    "cross-origin-embedder-policy",
    "cross-origin-opener-policy",
    "cross-origin-resource-policy",
];

/// Connection-scoped headers plus framing the proxy recomputes.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
    "content-encoding",
    "content-length",
];

pub const PERMISSIVE_CSP: &str = "frame-ancestors *; default-src * 'unsafe-inline' 'unsafe-eval'; script-src * 'unsafe-inline' 'unsafe-eval'; style-src * 'unsafe-inline';";

pub const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS, HEAD, PATCH";

const CORS_HEADERS: &[(&str, &str)] = &[
    ("access-control-allow-origin", "*"),
    ("access-control-allow-methods", ALLOWED_METHODS),
    ("access-control-allow-headers", "*"),
];

const FRAMING_HEADERS: &[(&str, &str)] = &[
    ("x-frame-options", "ALLOWALL"),
    ("content-security-policy", PERMISSIVE_CSP),
    ("cross-origin-embedder-policy", "unsafe-none"),
    ("cross-origin-opener-policy", "unsafe-none"),
    ("cross-origin-resource-policy", "cross-origin"),
];

const NO_CACHE_HEADERS: &[(&str, &str)] = &[
    ("cache-control", "no-cache, no-store, must-revalidate"),
    ("pragma", "no-cache"),
    ("expires", "0"),
];

/// Rewrite upstream headers in place so the response can be framed anywhere.
pub fn sanitize_headers(headers: &mut HeaderMap) {
    for name in BLOCKING_HEADERS.iter().chain(HOP_BY_HOP_HEADERS) {
        headers.remove(*name);
    }

    insert_all(headers, FRAMING_HEADERS);
    apply_cors_headers(headers);
    insert_all(headers, NO_CACHE_HEADERS);
}

/// Set the CORS allowances. Used alone for preflight and error responses.
pub fn apply_cors_headers(headers: &mut HeaderMap) {
    insert_all(headers, CORS_HEADERS);
}

/// Extra allowance used by the CORS variant so scripts can read every header.
pub fn expose_all_headers(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("*"),
    );
}

fn insert_all(headers: &mut HeaderMap, pairs: &[(&'static str, &'static str)]) {
    for (name, value) in pairs {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
        headers.append(
            "content-security-policy",
            HeaderValue::from_static("frame-ancestors 'none'"),
        );
        headers.append(
            "content-security-policy",
            HeaderValue::from_static("default-src 'self'"),
        );
        headers.insert("x-webkit-csp", HeaderValue::from_static("default-src 'self'"));
        headers.insert("referrer-policy", HeaderValue::from_static("no-referrer"));
        headers.insert("cross-origin-opener-policy", HeaderValue::from_static("same-origin"));
        headers.insert("content-type", HeaderValue::from_static("text/html; charset=ISO-8859-1"));
        headers.insert("content-encoding", HeaderValue::from_static("gzip"));
        headers.insert("content-length", HeaderValue::from_static("1234"));
        headers.insert("set-cookie", HeaderValue::from_static("session=abc"));
        headers.insert("cache-control", HeaderValue::from_static("public, max-age=600"));
        headers
    }

    #[test]
    fn framing_headers_replaced_not_merged() {
        let mut headers = upstream_headers();
        sanitize_headers(&mut headers);

        let xfo: Vec<_> = headers.get_all("x-frame-options").iter().collect();
        assert_eq!(xfo, vec!["ALLOWALL"]);

        let csp: Vec<_> = headers.get_all("content-security-policy").iter().collect();
        assert_eq!(csp, vec![PERMISSIVE_CSP]);

        assert!(headers.get("x-webkit-csp").is_none());
        assert!(headers.get("referrer-policy").is_none());
        assert_eq!(headers["cross-origin-opener-policy"], "unsafe-none");
        assert_eq!(headers["cross-origin-embedder-policy"], "unsafe-none");
        assert_eq!(headers["cross-origin-resource-policy"], "cross-origin");
    }

    #[test]
    fn content_type_preserved_verbatim() {
        let mut headers = upstream_headers();
        sanitize_headers(&mut headers);
        assert_eq!(headers["content-type"], "text/html; charset=ISO-8859-1");
        assert_eq!(headers["set-cookie"], "session=abc");
    }

    #[test]
    fn cache_is_disabled() {
        let mut headers = upstream_headers();
        sanitize_headers(&mut headers);
        assert_eq!(headers["cache-control"], "no-cache, no-store, must-revalidate");
        assert_eq!(headers["pragma"], "no-cache");
        assert_eq!(headers["expires"], "0");
    }

    #[test]
    fn body_framing_headers_dropped() {
        let mut headers = upstream_headers();
        sanitize_headers(&mut headers);
        assert!(headers.get("content-encoding").is_none());
        assert!(headers.get("content-length").is_none());
    }

    #[test]
    fn cors_allowances_present() {
        let mut headers = HeaderMap::new();
        sanitize_headers(&mut headers);
        assert_eq!(headers["access-control-allow-origin"], "*");
        assert_eq!(headers["access-control-allow-methods"], ALLOWED_METHODS);
        assert_eq!(headers["access-control-allow-headers"], "*");
    }

    #[test]
    fn sanitizing_twice_is_stable() {
        let mut once = upstream_headers();
        sanitize_headers(&mut once);
        let mut twice = once.clone();
        sanitize_headers(&mut twice);
        assert_eq!(once, twice);
    }
}
