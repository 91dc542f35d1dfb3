//! Prometheus metrics exposition
//!
//! Gateway-level metrics:
//!
//! - `ingest_requests_total` (counter): labels `route`, `status`
//! - `ingest_request_duration_seconds` (histogram): label `route`
//!
//! The library crates record their own counters through the same global
//! recorder: `token_refreshes_total{outcome}` from the lifecycle manager
//! and `uploads_total{outcome}` from the pipeline.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering.
///
/// Explicit buckets make `ingest_request_duration_seconds` render as a
/// real histogram (`_bucket` lines) instead of a summary. The range runs
/// from 5ms to 60s, covering a full staged upload round trip.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                "ingest_request_duration_seconds".to_string(),
            ),
            &[
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
            ],
        )
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed gateway request.
pub fn record_request(route: &'static str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!("ingest_requests_total", "route" => route, "status" => status_str)
        .increment(1);
    metrics::histogram!("ingest_request_duration_seconds", "route" => route)
        .record(duration_secs);
}
