//! Prometheus metrics recorder and `/metrics` rendering.

use metrics::{Unit, describe_counter, describe_histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use quibbler_runtime::metrics as names;
use tracing::info;

/// Install the Prometheus recorder as the global `metrics` recorder.
///
/// Call once at startup, before the engine records anything.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_all();
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

fn describe_all() {
    describe_counter!(names::EVENTS_TOTAL, "Inbound events by triage decision");
    describe_counter!(names::REVIEWS_TOTAL, "Completed reviews by verdict");
    describe_counter!(names::REVIEW_FAILURES_TOTAL, "Failed model invocations");
    describe_histogram!(
        names::REVIEW_DURATION_SECONDS,
        Unit::Seconds,
        "Model invocation latency"
    );
    describe_counter!(names::COMPACTIONS_TOTAL, "Compactions by kind");
    describe_counter!(
        names::COMPACTION_DEGRADED_TOTAL,
        "Compaction cycles that ended degraded"
    );
    describe_counter!(names::SESSIONS_EVICTED_TOTAL, "Sessions evicted while idle");
    describe_counter!(
        names::FEEDBACK_WRITE_FAILURES_TOTAL,
        "Feedback files that could not be written"
    );
}
