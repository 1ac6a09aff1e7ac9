//! Metrics module
//!
//! Process-local Prometheus metrics for upload runs. The CLI can dump them
//! in the text exposition format with `--metrics`.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    Encoder, HistogramVec, TextEncoder,
};

lazy_static! {
    pub static ref UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "calibre_uploadr_uploads_total",
        "Total number of upload pipeline runs",
        &["status"]
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "calibre_uploadr_upload_bytes_total",
        "Total bytes accepted by the object store"
    ).unwrap();

    pub static ref STAGE_DURATION: HistogramVec = register_histogram_vec!(
        "calibre_uploadr_stage_duration_seconds",
        "Pipeline stage duration in seconds",
        &["stage"],
        vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 120.0]
    ).unwrap();

    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "calibre_uploadr_errors_total",
        "Total pipeline failures",
        &["stage", "kind"]
    ).unwrap();
}

/// Record a successful pipeline run
pub fn record_upload_success() {
    UPLOADS_TOTAL.with_label_values(&["success"]).inc();
}

/// Record a failed pipeline run
pub fn record_upload_failure(stage: &str, kind: &str) {
    UPLOADS_TOTAL.with_label_values(&["failure"]).inc();
    ERRORS_TOTAL.with_label_values(&[stage, kind]).inc();
}

/// Record bytes accepted by the object store
pub fn record_upload_bytes(bytes: u64) {
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
}

/// Record stage duration
pub fn record_stage_duration(stage: &str, duration_secs: f64) {
    STAGE_DURATION
        .with_label_values(&[stage])
        .observe(duration_secs);
}

/// Render all registered metrics in the Prometheus text format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
