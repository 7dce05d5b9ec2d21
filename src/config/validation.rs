//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts, redirect bounds, limits)
//! - Check that addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;

/// Longest upstream deadline accepted from a config file.
pub const MAX_TIMEOUT_SECS: u64 = 120;

/// Highest redirect bound accepted from a config file.
pub const MAX_REDIRECTS: usize = 20;

/// Smallest rewrite memory cap that still fits the parser's own buffers.
pub const MIN_REWRITE_MEMORY: usize = 64 * 1024;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.is_empty() {
            errors.push(ValidationError::new("listener.tls.cert_path", "must not be empty"));
        }
        if tls.key_path.is_empty() {
            errors.push(ValidationError::new("listener.tls.key_path", "must not be empty"));
        }
    }

    let upstream = &config.upstream;
    if upstream.timeout_secs == 0 || upstream.timeout_secs > MAX_TIMEOUT_SECS {
        errors.push(ValidationError::new(
            "upstream.timeout_secs",
            format!("must be between 1 and {}", MAX_TIMEOUT_SECS),
        ));
    }
    if upstream.max_redirects > MAX_REDIRECTS {
        errors.push(ValidationError::new(
            "upstream.max_redirects",
            format!("must be at most {}", MAX_REDIRECTS),
        ));
    }
    if upstream.max_concurrent_fetches == 0 {
        errors.push(ValidationError::new("upstream.max_concurrent_fetches", "must be positive"));
    }
    if upstream.max_body_bytes == 0 {
        errors.push(ValidationError::new("upstream.max_body_bytes", "must be positive"));
    }
    if upstream.user_agent.trim().is_empty() {
        errors.push(ValidationError::new("upstream.user_agent", "must not be empty"));
    }

    if config.rewrite.max_memory_bytes < MIN_REWRITE_MEMORY {
        errors.push(ValidationError::new(
            "rewrite.max_memory_bytes",
            format!("must be at least {}", MIN_REWRITE_MEMORY),
        ));
    }

    let observability = &config.observability;
    if !matches!(observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::new(
            "observability.log_format",
            format!("unknown format '{}', expected 'pretty' or 'json'", observability.log_format),
        ));
    }
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
