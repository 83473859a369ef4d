//! Prometheus metrics exposition
//!
//! - `proxy_requests_total` (counter): labels `status`, `method`
//! - `proxy_request_duration_seconds` (histogram): label `status`
//! - `keypool_failures_total` (counter): quota-class failures reported to the pool
//! - `keypool_exhausted_total` (counter): requests rejected with every key quarantined

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Configures `proxy_request_duration_seconds` with explicit buckets so it
/// renders as a histogram (with `_bucket` lines usable in
/// `histogram_quantile()` queries) rather than the default summary. The range
/// covers 5ms to 60s, matching the configurable upstream timeout range.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                "proxy_request_duration_seconds".to_string(),
            ),
            &[
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
            ],
        )
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed proxy request with status code and HTTP method labels.
pub fn record_request(status: u16, method: &str, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!("proxy_requests_total", "status" => status_str.clone(), "method" => method.to_string())
        .increment(1);
    metrics::histogram!("proxy_request_duration_seconds", "status" => status_str)
        .record(duration_secs);
}

/// Record a quota-class failure reported to the key pool.
pub fn record_key_failure() {
    metrics::counter!("keypool_failures_total").increment(1);
}

/// Record a request rejected because no key was available.
pub fn record_pool_exhausted() {
    metrics::counter!("keypool_exhausted_total").increment(1);
}
