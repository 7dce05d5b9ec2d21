//! Config file layout.
//!
//! Every section is `#[serde(default)]`, so an empty file is a valid config.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the embedding proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Outbound fetch settings.
    pub upstream: UpstreamConfig,

    /// HTML rewriting switches.
    pub rewrite: RewriteConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3002").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3002".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Settings for the outbound request to the embedded site.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Hard deadline for the whole fetch (connect, headers, body) in seconds.
    pub timeout_secs: u64,

    /// Redirects followed before giving up.
    pub max_redirects: usize,

    /// Cap on simultaneous outbound fetches.
    pub max_concurrent_fetches: usize,

    /// Largest upstream body accepted, in bytes.
    pub max_body_bytes: usize,

    /// User-Agent presented to upstream sites.
    pub user_agent: String,

    /// Accept-Language presented to upstream sites.
    pub accept_language: String,
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_redirects: 10,
            max_concurrent_fetches: 256,
            max_body_bytes: 20 * 1024 * 1024, // 20MB
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
        }
    }
}

/// HTML rewriting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RewriteConfig {
    /// Rewrite HTML bodies at all. When false every body is passed through.
    pub enabled: bool,

    /// Inject the frame-busting neutralization script into `<head>`.
    pub inject_script: bool,

    /// Memory cap for rewriting one document. Pages that need more are
    /// served unmodified.
    pub max_memory_bytes: usize,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            inject_script: true,
            max_memory_bytes: 64 * 1024 * 1024, // 64MB
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format ("pretty" or "json").
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: ProxyConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:3002");
        assert_eq!(config.upstream.timeout_secs, 15);
        assert_eq!(config.upstream.max_redirects, 10);
        assert!(config.rewrite.enabled);
        assert!(config.listener.tls.is_none());
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [upstream]
            timeout_secs = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.upstream.timeout(), Duration::from_secs(30));
        assert_eq!(config.upstream.max_redirects, 10);
        assert_eq!(config.upstream.max_concurrent_fetches, 256);
    }
}
