//! Engine fixtures shared by the server tests.

use std::sync::Arc;

use async_trait::async_trait;
use quibbler_context::{SummarizeError, Summarizer, SummaryRequest};
use quibbler_core::ReviewReply;
use quibbler_llm::{ProviderError, ProviderResult, ReviewModel, ReviewRequest};
use quibbler_runtime::{ReviewEngine, SystemPrompts};
use quibbler_settings::QuibblerSettings;

/// Flags requests whose latest action mentions "bug"; fails on "explode".
pub(crate) struct KeywordReviewer;

#[async_trait]
impl ReviewModel for KeywordReviewer {
    async fn review(&self, request: &ReviewRequest) -> ProviderResult<ReviewReply> {
        let latest = &request.latest_action_description;
        if latest.contains("explode") {
            return Err(ProviderError::Other {
                message: "backend unavailable".into(),
            });
        }
        if latest.contains("bug") {
            Ok(ReviewReply::flag("Fix the bug."))
        } else {
            Ok(ReviewReply::approve("Looks good."))
        }
    }
}

pub(crate) struct NoopSummarizer;

#[async_trait]
impl Summarizer for NoopSummarizer {
    async fn summarize(&self, _request: SummaryRequest<'_>) -> Result<String, SummarizeError> {
        Ok("summary".into())
    }
}

pub(crate) fn test_engine() -> Arc<ReviewEngine> {
    Arc::new(ReviewEngine::new(
        &QuibblerSettings::default(),
        Arc::new(KeywordReviewer),
        Arc::new(NoopSummarizer),
        SystemPrompts::builtin(),
    ))
}
