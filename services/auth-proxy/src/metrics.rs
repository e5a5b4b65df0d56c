//! Prometheus metrics exposition
//!
//! - `auth_gate_decisions_total` (counter): label `state`
//! - `auth_redemptions_total` (counter): label `result`
//! - `proxy_requests_total` (counter): labels `status`, `method`
//! - `proxy_request_duration_seconds` (histogram): label `status`
//! - `proxy_upstream_errors_total` (counter): label `error_type`

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Instant;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Counters backing the health endpoint
#[derive(Debug, Clone)]
pub struct ServiceMetrics {
    pub requests_total: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }
}

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                "proxy_request_duration_seconds".to_string(),
            ),
            DURATION_BUCKETS,
        )
        .expect("histogram buckets are non-empty")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// `proxy_request_duration_seconds` gets explicit buckets so it renders as a
/// histogram (with `_bucket` lines) rather than a summary. Bucket boundaries
/// cover 5ms to 60s, matching the forwarding timeout range.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record the state a request ended in at the auth gate.
pub fn record_gate_decision(state: &'static str) {
    metrics::counter!("auth_gate_decisions_total", "state" => state).increment(1);
}

/// Record a code redemption attempt ("ok" or "error").
pub fn record_redemption(result: &'static str) {
    metrics::counter!("auth_redemptions_total", "result" => result).increment(1);
}

/// Record a completed forwarded request with status code and HTTP method labels.
pub fn record_request(status: u16, method: &str, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!("proxy_requests_total", "status" => status_str.clone(), "method" => method.to_string())
        .increment(1);
    metrics::histogram!("proxy_request_duration_seconds", "status" => status_str)
        .record(duration_secs);
}

/// Record an upstream error with a classification label.
pub fn record_upstream_error(error_type: &'static str) {
    metrics::counter!("proxy_upstream_errors_total", "error_type" => error_type).increment(1);
}
