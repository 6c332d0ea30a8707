//! Prometheus metrics for the pipeline.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder with an HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()
}

/// Metric names as constants for consistency.
pub mod names {
    // Job lifecycle
    pub const JOBS_SUBMITTED_TOTAL: &str = "vmod_jobs_submitted_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "vmod_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vmod_jobs_failed_total";
    pub const JOBS_CANCELLED_TOTAL: &str = "vmod_jobs_cancelled_total";
    pub const JOB_RETRIES_TOTAL: &str = "vmod_job_retries_total";

    // Analyzer
    pub const ANALYZER_DURATION_SECONDS: &str = "vmod_analyzer_duration_seconds";
    pub const ANALYZER_IN_FLIGHT: &str = "vmod_analyzer_in_flight";
    pub const ANALYZER_QUARANTINED: &str = "vmod_analyzer_quarantined";

    // Events
    pub use vmod_events::EVENTS_DROPPED_TOTAL;
}

pub fn record_job_submitted() {
    counter!(names::JOBS_SUBMITTED_TOTAL).increment(1);
}

pub fn record_job_completed(label: &str) {
    let labels = [("label", label.to_string())];
    counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
}

pub fn record_job_failed(category: &str) {
    let labels = [("error", category.to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_job_cancelled() {
    counter!(names::JOBS_CANCELLED_TOTAL).increment(1);
}

pub fn record_job_retry(category: &str) {
    let labels = [("error", category.to_string())];
    counter!(names::JOB_RETRIES_TOTAL, &labels).increment(1);
}

/// Record one analyzer call; `outcome` is `ok` or an error category.
pub fn record_analyzer_duration(outcome: &str, duration_secs: f64) {
    let labels = [("outcome", outcome.to_string())];
    histogram!(names::ANALYZER_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn set_analyzer_gauges(in_flight: usize, quarantined: usize) {
    gauge!(names::ANALYZER_IN_FLIGHT).set(in_flight as f64);
    gauge!(names::ANALYZER_QUARANTINED).set(quarantined as f64);
}
