//! Target URL validation.
//!
//! Purely syntactic: nothing here touches the network.

use url::Url;

use crate::error::ProxyError;

/// A target that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub url: Url,
    /// `scheme://host[:port]`, default ports omitted.
    pub origin: String,
}

impl Target {
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

/// Parse `raw` and accept it only if it is an absolute http(s) URL with a host.
pub fn validate_target(raw: &str) -> Result<Target, ProxyError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ProxyError::MissingUrl);
    }

    let url = Url::parse(raw).map_err(|e| ProxyError::InvalidUrl(format!("{}: {}", raw, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ProxyError::UnsupportedScheme(format!(
            "scheme '{}' is not supported",
            url.scheme()
        )));
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(ProxyError::InvalidUrl(format!("{}: missing host", raw)));
    }

    let origin = origin_of(&url);
    Ok(Target { url, origin })
}

/// Origin of an http(s) URL as used for rewriting root-relative references.
pub fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}
