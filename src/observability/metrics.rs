//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, latency, upstream fetch outcomes)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `embed_proxy_requests_total` (counter): requests by route, status
//! - `embed_proxy_request_duration_seconds` (histogram): latency distribution
//! - `embed_proxy_upstream_fetches_total` (counter): fetches by outcome
//! - `embed_proxy_upstream_fetch_duration_seconds` (histogram)
//! - `embed_proxy_html_rewrites_total` (counter): rewrites by result
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed, so tests and the
//!   CLI pay nothing
//! - Labels are low-cardinality: route name, status code, error kind

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Record a finished inbound request.
pub fn record_request(route: &'static str, status: u16, start: Instant) {
    let status = status.to_string();
    metrics::counter!("embed_proxy_requests_total", "route" => route, "status" => status.clone())
        .increment(1);
    metrics::histogram!("embed_proxy_request_duration_seconds", "route" => route, "status" => status)
        .record(start.elapsed().as_secs_f64());
}

/// Record an upstream fetch. `outcome` is a status class or an error kind.
pub fn record_fetch(outcome: &'static str, start: Instant) {
    metrics::counter!("embed_proxy_upstream_fetches_total", "outcome" => outcome).increment(1);
    metrics::histogram!("embed_proxy_upstream_fetch_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}

/// Record whether an HTML rewrite succeeded or fell back.
pub fn record_rewrite(result: &'static str) {
    metrics::counter!("embed_proxy_html_rewrites_total", "result" => result).increment(1);
}
