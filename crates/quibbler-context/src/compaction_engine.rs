//! Compaction engine for keeping review context within the model window.
//!
//! Runs before every review invocation, in two stages:
//!
//! 1. **Count-based summarization** (when `auto_summary` is on). Once the
//!    store holds more than `summary_trigger_turns` turns, everything but the
//!    last `retained_turns` is folded into the rolling summary.
//! 2. **Token-threshold compaction** (when enabled). If the estimate is at or
//!    above `trigger_fraction × capacity`, up to `max_passes` aggressive
//!    passes fold everything but the last `aggressive_tail_turns` turns,
//!    stopping as soon as the estimate drops below
//!    `target_fraction × capacity`.
//!
//! A summarizer failure ends the cycle. The store keeps whatever state the
//! last successful fold left, and the report is marked degraded so the
//! caller still invokes the reviewer with a best-effort context.

use quibbler_llm::models::context_capacity;
use quibbler_settings::QuibblerSettings;
use tracing::{info, trace, warn};

use crate::conversation_store::ConversationStore;
use crate::summarizer::{SummarizeError, SummaryRequest, Summarizer};

// =============================================================================
// Configuration
// =============================================================================

/// Knobs for one [`CompactionEngine`].
#[derive(Clone, Debug, PartialEq)]
pub struct CompactionConfig {
    /// Count-based summarization on/off.
    pub auto_summary: bool,
    /// Summarize once the turn count exceeds this.
    pub summary_trigger_turns: usize,
    /// Turns kept verbatim by count-based summarization.
    pub retained_turns: usize,
    /// Token-threshold compaction on/off.
    pub threshold_enabled: bool,
    /// Fraction of capacity at which compaction starts.
    pub trigger_fraction: f64,
    /// Fraction of capacity aggressive passes aim to get below.
    pub target_fraction: f64,
    /// Model context window in tokens.
    pub model_capacity: u64,
    /// Turns kept verbatim by an aggressive pass.
    pub aggressive_tail_turns: usize,
    /// Upper bound on aggressive passes per cycle.
    pub max_passes: u32,
}

impl CompactionConfig {
    /// Derive the configuration from merged settings.
    pub fn from_settings(settings: &QuibblerSettings) -> Self {
        let compaction = &settings.compaction;
        Self {
            auto_summary: settings.review.auto_summary,
            summary_trigger_turns: compaction.summary_trigger_turns,
            retained_turns: compaction.retained_turns.max(1),
            threshold_enabled: compaction.enabled,
            trigger_fraction: compaction.threshold_fraction,
            target_fraction: compaction
                .target_fraction
                .unwrap_or(compaction.threshold_fraction),
            model_capacity: context_capacity(&settings.review.model, compaction.model_capacity),
            aggressive_tail_turns: compaction.aggressive_tail_turns.max(1),
            max_passes: compaction.max_passes,
        }
    }

    /// Estimate at or above which threshold compaction starts.
    #[must_use]
    pub fn trigger_tokens(&self) -> u64 {
        fraction_of(self.trigger_fraction, self.model_capacity)
    }

    /// Estimate below which aggressive passes stop.
    #[must_use]
    pub fn target_tokens(&self) -> u64 {
        fraction_of(self.target_fraction.min(self.trigger_fraction), self.model_capacity)
    }
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self::from_settings(&QuibblerSettings::default())
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn fraction_of(fraction: f64, capacity: u64) -> u64 {
    (fraction * capacity as f64).round() as u64
}

// =============================================================================
// Report
// =============================================================================

/// Why a compaction cycle ended without a clean result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Degraded {
    /// A summarizer call failed; the store keeps its last good state.
    SummarizationFailed,
    /// The pass budget ran out (or nothing was left to fold) while the
    /// estimate was still at or above the trigger.
    StillOverThreshold,
}

impl Degraded {
    /// Label for logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SummarizationFailed => "summarization_failed",
            Self::StillOverThreshold => "still_over_threshold",
        }
    }
}

/// Outcome of one compaction cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompactionReport {
    /// Count-based summarization ran.
    pub summarized_by_count: bool,
    /// Aggressive passes executed.
    pub passes: u32,
    /// Estimate when the cycle started.
    pub estimate_before: u64,
    /// Estimate when the cycle ended.
    pub estimate_after: u64,
    /// Trigger point in tokens.
    pub trigger_tokens: u64,
    /// Set when the cycle could not finish cleanly.
    pub degraded: Option<Degraded>,
}

impl CompactionReport {
    /// True when the store was changed.
    #[must_use]
    pub fn compacted(&self) -> bool {
        self.summarized_by_count || self.passes > 0
    }
}

// =============================================================================
// CompactionEngine
// =============================================================================

/// Applies the summarization and threshold policies to a store.
#[derive(Clone, Debug, Default)]
pub struct CompactionEngine {
    config: CompactionConfig,
}

impl CompactionEngine {
    /// Create an engine.
    pub fn new(config: CompactionConfig) -> Self {
        Self { config }
    }

    /// Active configuration.
    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// True when the estimate has reached the trigger.
    #[must_use]
    pub fn should_compact(&self, store: &ConversationStore) -> bool {
        self.config.threshold_enabled
            && self.config.model_capacity > 0
            && store.estimated_size() >= self.config.trigger_tokens()
    }

    /// Run one full cycle against `store`.
    pub async fn run(
        &self,
        store: &mut ConversationStore,
        summarizer: &dyn Summarizer,
    ) -> CompactionReport {
        let mut report = CompactionReport {
            summarized_by_count: false,
            passes: 0,
            estimate_before: store.estimated_size(),
            estimate_after: 0,
            trigger_tokens: self.config.trigger_tokens(),
            degraded: None,
        };

        if self.config.auto_summary {
            match self.summarize_by_count(store, summarizer).await {
                Ok(ran) => report.summarized_by_count = ran,
                Err(error) => {
                    warn!(%error, turns = store.turn_count(), "count-based summarization failed");
                    report.degraded = Some(Degraded::SummarizationFailed);
                }
            }
        }

        if report.degraded.is_none() && self.should_compact(store) {
            self.compact_to_threshold(store, summarizer, &mut report).await;
        }

        report.estimate_after = store.estimated_size();
        if report.compacted() {
            info!(
                summarized_by_count = report.summarized_by_count,
                passes = report.passes,
                estimate_before = report.estimate_before,
                estimate_after = report.estimate_after,
                degraded = report.degraded.map(Degraded::as_str),
                "context compacted"
            );
        }
        report
    }

    /// Fold all but the last `retained_turns` turns once the count exceeds
    /// the trigger. Returns whether a fold happened.
    pub async fn summarize_by_count(
        &self,
        store: &mut ConversationStore,
        summarizer: &dyn Summarizer,
    ) -> Result<bool, SummarizeError> {
        let count = store.turn_count();
        if count <= self.config.summary_trigger_turns {
            return Ok(false);
        }
        let split = count - self.config.retained_turns.min(count);
        if split == 0 {
            return Ok(false);
        }

        trace!(
            turns = count,
            folding = split,
            retained = count - split,
            "summarizing older turns"
        );
        let digest = summarizer
            .summarize(SummaryRequest {
                previous: store.summary(),
                turns: &store.turns()[..split],
                aggressive: false,
            })
            .await?;
        store.fold_prefix(split, digest);
        Ok(true)
    }

    async fn compact_to_threshold(
        &self,
        store: &mut ConversationStore,
        summarizer: &dyn Summarizer,
        report: &mut CompactionReport,
    ) {
        let target = self.config.target_tokens();
        info!(
            estimate = store.estimated_size(),
            trigger = report.trigger_tokens,
            target,
            capacity = self.config.model_capacity,
            "context over threshold, compacting"
        );

        while report.passes < self.config.max_passes {
            let count = store.turn_count();
            let split = count.saturating_sub(self.config.aggressive_tail_turns);
            if split == 0 && store.summary().is_none() {
                trace!(turns = count, "nothing left to fold");
                break;
            }

            let digest = match summarizer
                .summarize(SummaryRequest {
                    previous: store.summary(),
                    turns: &store.turns()[..split],
                    aggressive: true,
                })
                .await
            {
                Ok(digest) => digest,
                Err(error) => {
                    warn!(%error, pass = report.passes + 1, "aggressive summarization failed");
                    report.degraded = Some(Degraded::SummarizationFailed);
                    return;
                }
            };
            store.fold_prefix(split, digest);
            report.passes += 1;

            let estimate = store.estimated_size();
            trace!(pass = report.passes, estimate, target, "compaction pass complete");
            if estimate < target {
                return;
            }
        }

        if store.estimated_size() >= report.trigger_tokens {
            warn!(
                estimate = store.estimated_size(),
                trigger = report.trigger_tokens,
                passes = report.passes,
                "context still over threshold after compaction"
            );
            report.degraded = Some(Degraded::StillOverThreshold);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::estimate_tokens;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use quibbler_core::Turn;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ── Fakes ────────────────────────────────────────────────────────────

    /// Returns a fixed-size digest and counts calls.
    struct FixedDigest {
        bytes: usize,
        calls: AtomicUsize,
        fail_on_call: Option<usize>,
    }

    impl FixedDigest {
        fn new(bytes: usize) -> Self {
            Self {
                bytes,
                calls: AtomicUsize::new(0),
                fail_on_call: None,
            }
        }

        fn failing_on(call: usize) -> Self {
            Self {
                fail_on_call: Some(call),
                ..Self::new(40)
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Summarizer for FixedDigest {
        async fn summarize(&self, _request: SummaryRequest<'_>) -> Result<String, SummarizeError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on_call == Some(call) {
                return Err(SummarizeError::EmptyDigest);
            }
            Ok("s".repeat(self.bytes))
        }
    }

    fn config(capacity: u64) -> CompactionConfig {
        CompactionConfig {
            auto_summary: true,
            summary_trigger_turns: 15,
            retained_turns: 5,
            threshold_enabled: true,
            trigger_fraction: 0.75,
            target_fraction: 0.75,
            model_capacity: capacity,
            aggressive_tail_turns: 2,
            max_passes: 3,
        }
    }

    fn store_with(turn_bytes: &[usize]) -> ConversationStore {
        let mut store = ConversationStore::new();
        for (i, bytes) in turn_bytes.iter().enumerate() {
            let mut content = format!("turn {i:03} ");
            content.push_str(&"x".repeat(bytes.saturating_sub(content.len())));
            store.append(Turn::user(content));
        }
        store
    }

    // ── Configuration ────────────────────────────────────────────────────

    #[test]
    fn config_from_default_settings() {
        let config = CompactionConfig::default();
        assert_eq!(config.model_capacity, 200_000);
        assert_eq!(config.trigger_tokens(), 150_000);
        assert_eq!(config.target_tokens(), 150_000);
        assert_eq!(config.summary_trigger_turns, 15);
        assert_eq!(config.retained_turns, 5);
    }

    #[test]
    fn config_honors_target_and_capacity_override() {
        let mut settings = QuibblerSettings::default();
        settings.compaction.target_fraction = Some(0.70);
        settings.compaction.model_capacity = Some(100_000);
        let config = CompactionConfig::from_settings(&settings);
        assert_eq!(config.trigger_tokens(), 75_000);
        assert_eq!(config.target_tokens(), 70_000);
    }

    // ── Count-based summarization ────────────────────────────────────────

    #[tokio::test]
    async fn sixteenth_turn_folds_all_but_five() {
        let engine = CompactionEngine::new(config(200_000));
        let summarizer = FixedDigest::new(40);
        let mut store = store_with(&[20; 16]);

        let report = engine.run(&mut store, &summarizer).await;

        assert!(report.summarized_by_count);
        assert_eq!(report.passes, 0);
        assert!(report.degraded.is_none());
        assert_eq!(summarizer.calls(), 1);
        let view = store.materialize();
        assert!(view.summary.is_some());
        assert_eq!(view.turns.len(), 5);
        assert!(view.turns[0].content.starts_with("turn 011"));
        assert!(view.turns[4].content.starts_with("turn 015"));
    }

    #[tokio::test]
    async fn fifteen_turns_leave_store_untouched() {
        let engine = CompactionEngine::new(config(200_000));
        let summarizer = FixedDigest::new(40);
        let mut store = store_with(&[20; 15]);
        let before = store.clone();

        let report = engine.run(&mut store, &summarizer).await;

        assert!(!report.compacted());
        assert_eq!(summarizer.calls(), 0);
        assert_eq!(store, before);
    }

    #[tokio::test]
    async fn auto_summary_off_skips_count_stage() {
        let mut cfg = config(200_000);
        cfg.auto_summary = false;
        let engine = CompactionEngine::new(cfg);
        let summarizer = FixedDigest::new(40);
        let mut store = store_with(&[20; 30]);

        let report = engine.run(&mut store, &summarizer).await;

        assert!(!report.compacted());
        assert_eq!(store.turn_count(), 30);
    }

    // ── Threshold compaction ─────────────────────────────────────────────

    #[tokio::test]
    async fn below_trigger_no_compaction() {
        // 0.70 target, 0.75 trigger: 145 000 of 200 000 stays put.
        let mut cfg = config(200_000);
        cfg.target_fraction = 0.70;
        let engine = CompactionEngine::new(cfg);
        let summarizer = FixedDigest::new(40);
        let mut store = store_with(&[290_000, 290_000]);
        assert_eq!(store.estimated_size(), 145_000);

        let report = engine.run(&mut store, &summarizer).await;

        assert_eq!(report.passes, 0);
        assert_eq!(summarizer.calls(), 0);
        assert_eq!(store.estimated_size(), 145_000);
    }

    #[tokio::test]
    async fn above_trigger_compacts_below_target() {
        let mut cfg = config(200_000);
        cfg.target_fraction = 0.70;
        let engine = CompactionEngine::new(cfg);
        let summarizer = FixedDigest::new(400);
        // 152 000 tokens spread over four turns; the tail of two is small.
        let mut store = store_with(&[300_000, 300_000, 4_000, 4_000]);
        assert_eq!(store.estimated_size(), 152_000);

        let report = engine.run(&mut store, &summarizer).await;

        assert_eq!(report.passes, 1);
        assert!(report.degraded.is_none());
        assert_eq!(report.estimate_before, 152_000);
        assert!(report.estimate_after < 140_000);
        assert_eq!(store.turn_count(), 2);
    }

    #[tokio::test]
    async fn oversized_tail_is_degraded_after_bounded_passes() {
        let engine = CompactionEngine::new(config(1_000));
        let summarizer = FixedDigest::new(40);
        // Each tail turn alone exceeds capacity.
        let mut store = store_with(&[100, 100, 8_000, 8_000]);

        let report = engine.run(&mut store, &summarizer).await;

        assert_eq!(report.degraded, Some(Degraded::StillOverThreshold));
        assert!(report.passes <= 3);
        assert_eq!(store.turn_count(), 2);
        assert!(store.latest().unwrap().content.starts_with("turn 003"));
    }

    #[tokio::test]
    async fn nothing_to_fold_reports_degraded_without_calls() {
        let engine = CompactionEngine::new(config(1_000));
        let summarizer = FixedDigest::new(40);
        let mut store = store_with(&[8_000]);

        let report = engine.run(&mut store, &summarizer).await;

        assert_eq!(report.passes, 0);
        assert_eq!(summarizer.calls(), 0);
        assert_eq!(report.degraded, Some(Degraded::StillOverThreshold));
    }

    #[tokio::test]
    async fn threshold_disabled_never_compacts() {
        let mut cfg = config(1_000);
        cfg.threshold_enabled = false;
        let engine = CompactionEngine::new(cfg);
        let summarizer = FixedDigest::new(40);
        let mut store = store_with(&[8_000, 8_000, 8_000]);

        let report = engine.run(&mut store, &summarizer).await;

        assert!(!report.compacted());
        assert!(report.degraded.is_none());
    }

    // ── Failures ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn count_stage_failure_leaves_store_unchanged() {
        let engine = CompactionEngine::new(config(200_000));
        let summarizer = FixedDigest::failing_on(1);
        let mut store = store_with(&[20; 16]);
        let before = store.clone();

        let report = engine.run(&mut store, &summarizer).await;

        assert_eq!(report.degraded, Some(Degraded::SummarizationFailed));
        assert_eq!(store, before);
    }

    #[tokio::test]
    async fn failure_mid_cycle_keeps_last_good_state() {
        let engine = CompactionEngine::new(config(1_000));
        let summarizer = FixedDigest::failing_on(2);
        let mut store = store_with(&[4_000, 4_000, 4_000, 4_000]);

        let report = engine.run(&mut store, &summarizer).await;

        assert_eq!(report.passes, 1);
        assert_eq!(report.degraded, Some(Degraded::SummarizationFailed));
        assert_eq!(store.turn_count(), 2);
        assert_eq!(store.summary().map(estimate_tokens), Some(10));
    }

    // ── Properties ───────────────────────────────────────────────────────

    proptest! {
        #[test]
        fn latest_turn_survives_and_threshold_respected(
            sizes in prop::collection::vec(1usize..4_000, 1..40),
            digest in 1usize..600,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let engine = CompactionEngine::new(config(2_000));
            let summarizer = FixedDigest::new(digest);
            let mut store = store_with(&sizes);
            let latest = store.latest().cloned();

            let report = rt.block_on(engine.run(&mut store, &summarizer));

            prop_assert_eq!(store.latest().cloned(), latest);
            prop_assert!(report.passes <= 3);
            prop_assert!(
                store.estimated_size() < engine.config().trigger_tokens()
                    || report.degraded == Some(Degraded::StillOverThreshold)
            );
        }
    }
}
