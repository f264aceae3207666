//! Metrics collection and exposition.
//!
//! # Metrics
//! - `replay_proxy_connections_active` (gauge): open client connections
//! - `replay_proxy_requests_total` (counter): requests by outcome
//!   (`forwarded`, `cached`, `deduplicated`)
//! - `replay_proxy_archive_entries` (gauge): entries in the live archive
//! - `replay_proxy_pending_wait_seconds` (histogram): time spent waiting
//!   for an identical in-flight request
//! - `replay_proxy_connection_errors_total` (counter): torn-down
//!   connections by error kind
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Prometheus exposition is opt-in via configuration

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// How a request was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Forwarded,
    Cached,
    Deduplicated,
}

impl RequestOutcome {
    fn label(self) -> &'static str {
        match self {
            RequestOutcome::Forwarded => "forwarded",
            RequestOutcome::Cached => "cached",
            RequestOutcome::Deduplicated => "deduplicated",
        }
    }
}

pub fn record_request(outcome: RequestOutcome) {
    metrics::counter!("replay_proxy_requests_total", "outcome" => outcome.label()).increment(1);
}

pub fn record_archive_size(entries: usize) {
    metrics::gauge!("replay_proxy_archive_entries").set(entries as f64);
}

pub fn record_pending_wait(waited: Duration) {
    metrics::histogram!("replay_proxy_pending_wait_seconds").record(waited.as_secs_f64());
}

pub fn record_connection_error(kind: &'static str) {
    metrics::counter!("replay_proxy_connection_errors_total", "kind" => kind).increment(1);
}

pub fn record_active_connections(active: u64) {
    metrics::gauge!("replay_proxy_connections_active").set(active as f64);
}
