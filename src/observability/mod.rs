//! Logs and metrics.
//!
//! `logging.rs` installs the `tracing` subscriber (plain or JSON lines);
//! every request runs inside a span carrying its `x-request-id`.
//! `metrics.rs` records through the `metrics` facade and optionally serves a
//! Prometheus scrape endpoint on its own port.

pub mod logging;
pub mod metrics;
