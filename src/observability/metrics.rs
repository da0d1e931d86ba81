//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define packager metrics (signing outcomes, latency, cache refreshes)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `sxg_requests_total` (counter): signing requests by outcome
//! - `sxg_request_duration_seconds` (histogram): end-to-end signing latency
//! - `rtv_refresh_total` (counter): RTV refreshes by result
//! - `cert_store_reads_total` (counter): certificate store reads by result
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Recording is a no-op until a recorder is installed, so tests and the
//!   CLI need no setup

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record the outcome of one signing request.
pub fn record_request(outcome: &'static str, elapsed: Duration) {
    metrics::counter!("sxg_requests_total", "outcome" => outcome).increment(1);
    metrics::histogram!("sxg_request_duration_seconds").record(elapsed.as_secs_f64());
}

/// Record the result of one RTV refresh (`updated`, `unchanged`, `failed`).
pub fn record_rtv_refresh(result: &'static str) {
    metrics::counter!("rtv_refresh_total", "result" => result).increment(1);
}

/// Record the result of one certificate store read.
pub fn record_cert_store_read(result: &'static str) {
    metrics::counter!("cert_store_reads_total", "result" => result).increment(1);
}
