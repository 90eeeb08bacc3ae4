//! Metric names and recording helpers for the review pipeline.
//!
//! Names live here so the server's exporter and the engine agree on them.

use metrics::counter;
use quibbler_context::CompactionReport;

/// Events processed (counter, labels: decision).
pub const EVENTS_TOTAL: &str = "quibbler_events_total";
/// Completed reviews (counter, labels: verdict).
pub const REVIEWS_TOTAL: &str = "quibbler_reviews_total";
/// Failed model invocations (counter).
pub const REVIEW_FAILURES_TOTAL: &str = "quibbler_review_failures_total";
/// Model invocation latency (histogram).
pub const REVIEW_DURATION_SECONDS: &str = "quibbler_review_duration_seconds";
/// Compactions performed (counter, labels: kind = count|threshold).
pub const COMPACTIONS_TOTAL: &str = "quibbler_compactions_total";
/// Degraded compaction cycles (counter, labels: reason).
pub const COMPACTION_DEGRADED_TOTAL: &str = "quibbler_compaction_degraded_total";
/// Sessions evicted by the idle sweeper (counter).
pub const SESSIONS_EVICTED_TOTAL: &str = "quibbler_sessions_evicted_total";
/// Feedback files that could not be written (counter).
pub const FEEDBACK_WRITE_FAILURES_TOTAL: &str = "quibbler_feedback_write_failures_total";

/// Every metric name, for exporters that pre-register descriptions.
pub const ALL: &[&str] = &[
    EVENTS_TOTAL,
    REVIEWS_TOTAL,
    REVIEW_FAILURES_TOTAL,
    REVIEW_DURATION_SECONDS,
    COMPACTIONS_TOTAL,
    COMPACTION_DEGRADED_TOTAL,
    SESSIONS_EVICTED_TOTAL,
    FEEDBACK_WRITE_FAILURES_TOTAL,
];

pub(crate) fn record_compaction(report: &CompactionReport) {
    if report.summarized_by_count {
        counter!(COMPACTIONS_TOTAL, "kind" => "count").increment(1);
    }
    if report.passes > 0 {
        counter!(COMPACTIONS_TOTAL, "kind" => "threshold").increment(u64::from(report.passes));
    }
    if let Some(reason) = report.degraded {
        counter!(COMPACTION_DEGRADED_TOTAL, "reason" => reason.as_str()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_prefixed_snake_case() {
        for name in ALL {
            assert!(name.starts_with("quibbler_"), "{name}");
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "{name}"
            );
        }
    }
}
