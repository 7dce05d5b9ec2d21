//! Embedding proxy library.
//!
//! Fetches third-party pages on behalf of a dashboard and returns them in a
//! form that can be shown inside an `<iframe>`: framing-denial headers are
//! stripped, root-relative URLs are absolutized, known frame-busting scripts
//! are removed and a neutralization script is injected.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod resilience;
pub mod security;

pub use config::ProxyConfig;
pub use error::ProxyError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
