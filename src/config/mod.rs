//! Proxy configuration.
//!
//! # Data Flow
//! ```text
//! proxy.toml (optional; every section defaults)
//!     → loader.rs: toml → ProxyConfig
//!     → validation.rs: every problem reported at once
//!     → main: listener, observability, HttpServer
//!
//! proxy.toml edited
//!     → watcher.rs: re-parse + re-validate
//!     → mpsc channel → HttpServer rebuilds the Fetcher, ArcSwap store
//! ```
//!
//! # Design Decisions
//! - Upstream and rewrite settings apply on reload; the listener,
//!   TLS and observability sections are read once at startup
//! - An invalid edit is logged and ignored, the running config stays

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    ListenerConfig, ObservabilityConfig, ProxyConfig, RewriteConfig, TlsConfig, UpstreamConfig,
};
