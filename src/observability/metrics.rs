//! # Metrics Export
//!
//! Components emit through the `metrics` facade macros; this module installs
//! the Prometheus recorder that backs them and renders the `/metrics` page.
//!
//! The recorder is process-global and can be installed once. Without it the
//! macros are no-ops, which is what unit and integration tests rely on.

use crate::core::error::{ShieldError, ShieldResult};
use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

pub const RATE_LIMIT_DECISIONS: &str = "shield_rate_limit_decisions_total";
pub const READ_CACHE_LOOKUPS: &str = "shield_read_cache_lookups_total";
pub const IDEMPOTENCY_REPLAYS: &str = "shield_idempotency_replays_total";
pub const REQUEST_DURATION: &str = "shield_request_duration_seconds";
pub const PERFORMANCE_ALERTS: &str = "shield_performance_alerts_total";

/// Histogram buckets for request latency, in seconds
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.15, 0.2, 0.25, 0.3, 0.5, 1.0, 2.5,
];

/// Install the global Prometheus recorder and return a handle for rendering
pub fn install_recorder() -> ShieldResult<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(REQUEST_DURATION.to_string()), LATENCY_BUCKETS)
        .map_err(|e| ShieldError::internal(format!("Failed to set histogram buckets: {}", e)))?
        .install_recorder()
        .map_err(|e| ShieldError::internal(format!("Failed to install metrics recorder: {}", e)))?;

    describe_metrics();
    Ok(handle)
}

fn describe_metrics() {
    describe_counter!(RATE_LIMIT_DECISIONS, "Admission decisions by policy and outcome");
    describe_counter!(READ_CACHE_LOOKUPS, "Read cache lookups by result");
    describe_counter!(IDEMPOTENCY_REPLAYS, "Mutation responses replayed from the idempotency store");
    describe_histogram!(REQUEST_DURATION, Unit::Seconds, "Handler latency by endpoint and method");
    describe_counter!(PERFORMANCE_ALERTS, "Latency alerts by severity");
}
