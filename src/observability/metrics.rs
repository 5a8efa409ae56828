//! Metrics collection and exposition.
//!
//! # Metrics
//! - `server_requests_total` (counter): requests by method, status
//! - `server_request_duration_seconds` (histogram): latency distribution
//! - `server_active_requests` (gauge): requests currently dispatching
//! - `server_websocket_sessions_active` (gauge): open WebSocket sessions
//! - `server_websocket_sessions_total` (counter): sessions opened
//!
//! # Design Decisions
//! - Recording without an installed exporter is a no-op
//! - Labels limited to method and status code

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with an HTTP scrape listener.
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> bool {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            tracing::info!(address = %addr, "Metrics exporter listening");
            true
        }
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter");
            false
        }
    }
}

pub fn record_request(method: &str, status: u16, started: Instant) {
    counter!(
        "server_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("server_request_duration_seconds", "method" => method.to_string())
        .record(started.elapsed().as_secs_f64());
}

pub fn request_started() {
    gauge!("server_active_requests").increment(1.0);
}

pub fn request_finished() {
    gauge!("server_active_requests").decrement(1.0);
}

pub fn session_opened() {
    counter!("server_websocket_sessions_total").increment(1);
    gauge!("server_websocket_sessions_active").increment(1.0);
}

pub fn session_closed() {
    gauge!("server_websocket_sessions_active").decrement(1.0);
}
