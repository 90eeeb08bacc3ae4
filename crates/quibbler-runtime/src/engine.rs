//! The review engine.
//!
//! One call per inbound event. Under the key's critical section the engine
//! refreshes rules, triages the event, records it, compacts the store, calls
//! the reviewer, records the review, and (on the asynchronous path) hands a
//! flag to the feedback sink. Different keys never wait on each other except
//! for the global invocation semaphore.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use metrics::{counter, histogram};
use quibbler_context::{
    CompactionConfig, CompactionEngine, CompactionReport, RuleCache, Summarizer,
};
use quibbler_core::{EventType, InboundEvent, ReviewReply, Turn, Verdict};
use quibbler_llm::{ReviewModel, ReviewRequest};
use quibbler_settings::QuibblerSettings;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::delivery::{DeliveryStatus, FeedbackSink};
use crate::errors::RuntimeError;
use crate::format::{AGENT_PLAN_KEY, USER_INSTRUCTIONS_KEY, turn_for_event};
use crate::metrics::{
    EVENTS_TOTAL, FEEDBACK_WRITE_FAILURES_TOTAL, REVIEW_DURATION_SECONDS, REVIEW_FAILURES_TOTAL,
    REVIEWS_TOTAL, record_compaction,
};
use crate::prompts::{PromptMode, SystemPrompts};
use crate::registry::{Session, SessionRegistry};
use crate::triage::{Decision, TriagePolicy};

/// What happened to one event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventOutcome {
    /// Dropped by triage.
    Skipped,
    /// Appended without a review.
    Recorded,
    /// Appended and reviewed.
    Reviewed(ReviewReport),
}

/// Result of a completed review.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReviewReport {
    /// Verdict and feedback.
    pub reply: ReviewReply,
    /// What compaction did before the invocation.
    pub compaction: CompactionReport,
    /// 1-based review count for the key.
    pub review_number: u64,
    /// Sink outcome, when a sink was supplied.
    pub delivery: Option<DeliveryStatus>,
}

/// Shared engine state. Cheap to share behind an `Arc`.
pub struct ReviewEngine {
    triage: TriagePolicy,
    compaction: CompactionEngine,
    registry: Arc<SessionRegistry>,
    rules: Arc<RuleCache>,
    reviewer: Arc<dyn ReviewModel>,
    summarizer: Arc<dyn Summarizer>,
    prompts: SystemPrompts,
    permits: Semaphore,
}

impl ReviewEngine {
    /// Build an engine from merged settings.
    pub fn new(
        settings: &QuibblerSettings,
        reviewer: Arc<dyn ReviewModel>,
        summarizer: Arc<dyn Summarizer>,
        prompts: SystemPrompts,
    ) -> Self {
        Self {
            triage: TriagePolicy::from_settings(&settings.review),
            compaction: CompactionEngine::new(CompactionConfig::from_settings(settings)),
            registry: Arc::new(SessionRegistry::from_settings(&settings.sessions)),
            rules: Arc::new(RuleCache::new()),
            reviewer,
            summarizer,
            prompts,
            permits: Semaphore::new(settings.sessions.max_concurrent_reviews.max(1)),
        }
    }

    /// Session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Project rule cache.
    pub fn rules(&self) -> &Arc<RuleCache> {
        &self.rules
    }

    /// Stop admitting model invocations. Reviews already running finish;
    /// later ones fail with [`RuntimeError::Shutdown`].
    pub fn close(&self) {
        self.permits.close();
    }

    /// Process one event and return its outcome (synchronous path).
    pub async fn handle(&self, event: InboundEvent) -> Result<EventOutcome, RuntimeError> {
        self.process(event, None).await
    }

    /// Process one event and deliver any flag through `sink`.
    pub async fn handle_and_deliver(
        &self,
        event: InboundEvent,
        sink: &dyn FeedbackSink,
    ) -> Result<EventOutcome, RuntimeError> {
        self.process(event, Some(sink)).await
    }

    /// Synchronous `review_code` entry point, keyed by project path.
    pub async fn review_code(
        &self,
        project_path: &Path,
        user_instructions: &str,
        agent_plan: &str,
    ) -> Result<ReviewReply, RuntimeError> {
        let key = project_path.to_string_lossy().into_owned();
        let event = InboundEvent::new(
            EventType::ReviewRequest,
            key,
            PathBuf::from(project_path),
            json!({
                USER_INSTRUCTIONS_KEY: user_instructions,
                AGENT_PLAN_KEY: agent_plan,
            }),
        );
        match self.handle(event).await? {
            EventOutcome::Reviewed(report) => Ok(report.reply),
            // Review requests always triage to a review.
            EventOutcome::Skipped | EventOutcome::Recorded => Ok(ReviewReply::approve("")),
        }
    }

    #[instrument(skip_all, fields(context_key = %event.context_key, event_type = %event.event_type))]
    async fn process(
        &self,
        event: InboundEvent,
        sink: Option<&dyn FeedbackSink>,
    ) -> Result<EventOutcome, RuntimeError> {
        let slot = self
            .registry
            .get_or_create(&event.context_key, &event.project_root);
        let mut session = slot.lock().await;
        slot.touch();
        let result = self.process_locked(&mut session, &event, sink).await;
        slot.publish(&session);
        result
    }

    async fn process_locked(
        &self,
        session: &mut Session,
        event: &InboundEvent,
        sink: Option<&dyn FeedbackSink>,
    ) -> Result<EventOutcome, RuntimeError> {
        session.refresh(&event.project_root, &self.rules).await;

        if session.stopped
            && matches!(
                event.event_type,
                EventType::UserPromptSubmit | EventType::SessionStart
            )
        {
            session.stopped = false;
            info!("session reopened");
        }

        let mut decision = self.triage.decide(event);
        if session.stopped
            && decision == Decision::RecordAndReview
            && event.event_type != EventType::ReviewRequest
        {
            debug!("session stopped, recording without review");
            decision = Decision::RecordOnly;
        }
        counter!(EVENTS_TOTAL, "decision" => decision.as_str()).increment(1);
        debug!(decision = decision.as_str(), tool = ?event.tool_name, "event triaged");

        let result = match decision {
            Decision::Skip => Ok(EventOutcome::Skipped),
            Decision::RecordOnly => {
                session.store.append(turn_for_event(event));
                Ok(EventOutcome::Recorded)
            }
            Decision::RecordAndReview => self.review(session, event, sink).await,
        };

        if matches!(event.event_type, EventType::Stop | EventType::SessionEnd) && !session.stopped {
            session.stopped = true;
            info!("session stopped");
        }
        result
    }

    async fn review(
        &self,
        session: &mut Session,
        event: &InboundEvent,
        sink: Option<&dyn FeedbackSink>,
    ) -> Result<EventOutcome, RuntimeError> {
        session.store.append(turn_for_event(event));

        let compaction = self
            .compaction
            .run(&mut session.store, self.summarizer.as_ref())
            .await;
        record_compaction(&compaction);

        let (context, latest) = session.store.materialize().split_latest();
        let mode = if event.event_type == EventType::ReviewRequest {
            PromptMode::Tool
        } else {
            PromptMode::Hook
        };
        let request = ReviewRequest {
            system_instructions: self.prompts.for_mode(mode).to_owned(),
            rules_text: Arc::clone(&session.rules().text),
            materialized_context: context,
            latest_action_description: latest.map(|turn| turn.content).unwrap_or_default(),
        };

        let reply = {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| RuntimeError::Shutdown)?;
            let started = Instant::now();
            let result = self.reviewer.review(&request).await;
            histogram!(REVIEW_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
            result
        };
        let reply = match reply {
            Ok(reply) => reply,
            Err(error) => {
                counter!(REVIEW_FAILURES_TOTAL).increment(1);
                warn!(%error, category = error.category(), "review failed");
                return Err(error.into());
            }
        };

        session.store.append(Turn::review(render_review_turn(&reply)));
        session.review_count += 1;
        counter!(REVIEWS_TOTAL, "verdict" => reply.verdict.as_str()).increment(1);
        info!(
            verdict = reply.verdict.as_str(),
            review_number = session.review_count,
            turns = session.store.turn_count(),
            "review complete"
        );

        let delivery = match sink {
            Some(sink) => Some(deliver(sink, session, &reply).await),
            None => None,
        };

        Ok(EventOutcome::Reviewed(ReviewReport {
            reply,
            compaction,
            review_number: session.review_count,
            delivery,
        }))
    }
}

impl std::fmt::Debug for ReviewEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReviewEngine")
            .field("triage", &self.triage)
            .field("sessions", &self.registry.len())
            .field("available_permits", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

/// Flags are written; approvals leave any unread feedback in place.
async fn deliver(sink: &dyn FeedbackSink, session: &Session, reply: &ReviewReply) -> DeliveryStatus {
    if reply.verdict != Verdict::Flag {
        return DeliveryStatus::NoFeedback;
    }
    match sink.deliver(session.project_root(), session.key(), reply).await {
        Ok(path) => DeliveryStatus::Written(path),
        Err(error) => {
            counter!(FEEDBACK_WRITE_FAILURES_TOTAL).increment(1);
            warn!(%error, "feedback delivery failed");
            DeliveryStatus::Failed(error.to_string())
        }
    }
}

fn render_review_turn(reply: &ReviewReply) -> String {
    let verdict = reply.verdict.as_str().to_uppercase();
    if reply.feedback_text.is_empty() {
        format!("VERDICT: {verdict}")
    } else {
        format!("VERDICT: {verdict}\n{}", reply.feedback_text)
    }
}
