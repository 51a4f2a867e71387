//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_evaluated_total` (counter): requests by resulting tier
//! - `gateway_rejections_total` (counter): rejected requests by reason
//! - `gateway_throttled_total` (counter): requests delayed in the suspicious tier
//! - `gateway_blocked_identities` (gauge): size of the blocked set
//! - `gateway_reputation_records` (gauge): records left after the last sweep
//! - `gateway_sweep_evictions_total` (counter): records evicted by the sweep
//! - `gateway_active_connections` (gauge): connections in the active phase
//! - `gateway_connections_total` (counter): finished connections by outcome
//! - `gateway_connection_duration_seconds` (histogram): connection lifetime
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Duration;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_verdict(tier: &'static str) {
    counter!("gateway_requests_evaluated_total", "tier" => tier).increment(1);
}

pub fn record_rejection(reason: &'static str) {
    counter!("gateway_rejections_total", "reason" => reason).increment(1);
}

pub fn record_throttled() {
    counter!("gateway_throttled_total").increment(1);
}

pub fn set_blocked_identities(count: usize) {
    gauge!("gateway_blocked_identities").set(count as f64);
}

pub fn record_sweep(evicted: usize, remaining: usize) {
    counter!("gateway_sweep_evictions_total").increment(evicted as u64);
    gauge!("gateway_reputation_records").set(remaining as f64);
}

pub fn set_active_connections(count: u64) {
    gauge!("gateway_active_connections").set(count as f64);
}

pub fn record_connection_closed(outcome: &'static str, lifetime: Duration) {
    counter!("gateway_connections_total", "outcome" => outcome).increment(1);
    histogram!("gateway_connection_duration_seconds").record(lifetime.as_secs_f64());
}
