//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by group, status
//! - `gateway_request_duration_seconds` (histogram): latency by group
//! - `gateway_rate_limited_total` (counter): denials by scope
//! - `gateway_circuit_rejected_total` (counter): fail-fast denials by group
//! - `gateway_circuit_transitions_total` (counter): state changes by group, state
//! - `gateway_admission_faults_total` (counter): fail-open events by component
//! - `gateway_tracked_keys` (gauge): rate limiter keys in memory
//!
//! Recording is a no-op until a recorder is installed, so engines and tests
//! can call these freely.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(group: &str, status: u16, start: Instant) {
    counter!(
        "gateway_requests_total",
        "group" => group.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "group" => group.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(scope: &'static str) {
    counter!("gateway_rate_limited_total", "scope" => scope).increment(1);
}

pub fn record_circuit_rejected(group: &str) {
    counter!("gateway_circuit_rejected_total", "group" => group.to_string()).increment(1);
}

pub fn record_circuit_transition(group: &str, state: &'static str) {
    counter!(
        "gateway_circuit_transitions_total",
        "group" => group.to_string(),
        "state" => state
    )
    .increment(1);
}

pub fn record_admission_fault(component: &'static str) {
    counter!("gateway_admission_faults_total", "component" => component).increment(1);
}

pub fn record_tracked_keys(count: usize) {
    gauge!("gateway_tracked_keys").set(count as f64);
}
