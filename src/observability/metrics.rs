//! Metrics collection and exposition.
//!
//! # Metrics
//! - `tls_connections_opened_total` (counter): connections reaching Active, by role
//! - `tls_connections_closed_total` (counter): terminal transitions, by role and outcome
//! - `tls_active_connections` (gauge): connections currently Active, by role
//! - `tls_handshake_duration_seconds` (histogram): open latency, by role
//! - `tls_bytes_received_total` (counter): inbound payload bytes, by role
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - Labels kept to role and outcome to bound cardinality

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Which side of the connection recorded the metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Server => "server",
        }
    }
}

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Closed,
    Failed,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Closed => "closed",
            Outcome::Failed => "failed",
        }
    }
}

pub fn record_opened(role: Role, handshake: Duration) {
    metrics::counter!("tls_connections_opened_total", "role" => role.as_str()).increment(1);
    metrics::gauge!("tls_active_connections", "role" => role.as_str()).increment(1.0);
    metrics::histogram!("tls_handshake_duration_seconds", "role" => role.as_str())
        .record(handshake.as_secs_f64());
}

/// `was_active` decrements the active gauge for connections that got past the handshake.
pub fn record_terminal(role: Role, outcome: Outcome, was_active: bool) {
    metrics::counter!(
        "tls_connections_closed_total",
        "role" => role.as_str(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
    if was_active {
        metrics::gauge!("tls_active_connections", "role" => role.as_str()).decrement(1.0);
    }
}

pub fn record_received(role: Role, bytes: usize) {
    metrics::counter!("tls_bytes_received_total", "role" => role.as_str()).increment(bytes as u64);
}

/// Install the Prometheus recorder and its HTTP scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}
