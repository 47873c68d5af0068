//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): by service, status
//! - `gateway_request_duration_seconds` (histogram): by service
//! - `gateway_auth_failures_total` (counter): by service
//! - `gateway_rate_limited_total` (counter): by service
//! - `gateway_breaker_transitions_total` (counter): by service, state
//! - `gateway_cache_total` (counter): by service, outcome (hit/miss)
//!
//! The Prometheus render handle is served from the main router at
//! `/metrics`, gated to internal-network callers.

use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::resilience::BreakerState;

/// Install the global Prometheus recorder. Call once at boot.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

pub fn record_request(service: &str, status: u16, start: Instant) {
    counter!(
        "gateway_requests_total",
        "service" => service.to_string(),
        "status" => status.to_string(),
    )
    .increment(1);
    histogram!(
        "gateway_request_duration_seconds",
        "service" => service.to_string(),
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_auth_failure(service: &str) {
    counter!(
        "gateway_auth_failures_total",
        "service" => service.to_string(),
    )
    .increment(1);
}

pub fn record_rate_limited(service: &str) {
    counter!(
        "gateway_rate_limited_total",
        "service" => service.to_string(),
    )
    .increment(1);
}

pub fn record_breaker_transition(service: &str, to: BreakerState) {
    counter!(
        "gateway_breaker_transitions_total",
        "service" => service.to_string(),
        "state" => to.as_str(),
    )
    .increment(1);
}

pub fn record_cache(service: &str, hit: bool) {
    counter!(
        "gateway_cache_total",
        "service" => service.to_string(),
        "outcome" => if hit { "hit" } else { "miss" },
    )
    .increment(1);
}
