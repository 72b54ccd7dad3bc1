//! Metrics bootstrap (SPEC_FULL §3): installs a Prometheus recorder at
//! startup and exposes a render handle for the `/metrics` route. Counters
//! cover sessions started/completed per kind, enrollment retries, and
//! verification outcomes by method; histograms cover pipeline stage latency.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const SESSIONS_STARTED: &str = "voxkey_sessions_started_total";
const SESSIONS_COMPLETED: &str = "voxkey_sessions_completed_total";
const ENROLLMENT_RETRIES: &str = "voxkey_enrollment_retries_total";
const VERIFICATION_OUTCOMES: &str = "voxkey_verification_outcomes_total";
const PIPELINE_STAGE_LATENCY: &str = "voxkey_pipeline_stage_latency_seconds";

/// Install the global Prometheus recorder and describe every metric used
/// below. Returns the handle the `/metrics` route renders from.
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    metrics::describe_counter!(SESSIONS_STARTED, "Sessions started, labeled by kind");
    metrics::describe_counter!(SESSIONS_COMPLETED, "Sessions completed, labeled by kind and outcome");
    metrics::describe_counter!(ENROLLMENT_RETRIES, "Enrollment set retries due to ASR mismatch or pipeline error");
    metrics::describe_counter!(VERIFICATION_OUTCOMES, "Verification outcomes, labeled by auth method");
    metrics::describe_histogram!(PIPELINE_STAGE_LATENCY, "Per-stage pipeline latency in seconds");

    handle
}

pub fn record_session_started(kind: &'static str) {
    metrics::counter!(SESSIONS_STARTED, "kind" => kind).increment(1);
}

pub fn record_session_completed(kind: &'static str, outcome: &'static str) {
    metrics::counter!(SESSIONS_COMPLETED, "kind" => kind, "outcome" => outcome).increment(1);
}

pub fn record_enrollment_retry() {
    metrics::counter!(ENROLLMENT_RETRIES).increment(1);
}

pub fn record_verification_outcome(method: &'static str) {
    metrics::counter!(VERIFICATION_OUTCOMES, "method" => method).increment(1);
}

pub fn record_stage_latency(stage: &'static str, seconds: f64) {
    metrics::histogram!(PIPELINE_STAGE_LATENCY, "stage" => stage).record(seconds);
}
