//! Summarizer port and its model-backed implementation.
//!
//! The compaction engine only sees the [`Summarizer`] trait, so tests can
//! count calls or inject failures without a model.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use quibbler_core::Turn;
use quibbler_llm::{ChatMessage, ProviderError, TextModel};
use tracing::debug;

use crate::constants::{
    AGGRESSIVE_DIGEST_TOKENS, NO_PREVIOUS_SUMMARY, STANDARD_DIGEST_TOKENS,
    SUMMARIZER_SYSTEM_PROMPT, SUMMARIZER_TURN_TEXT_LIMIT, SUMMARY_INSTRUCTIONS,
};

// =============================================================================
// Summarizer Trait
// =============================================================================

/// Input to one digest call.
#[derive(Clone, Copy, Debug)]
pub struct SummaryRequest<'a> {
    /// Digest produced by the previous fold, if any.
    pub previous: Option<&'a str>,
    /// Turns being folded, oldest first.
    pub turns: &'a [Turn],
    /// Ask for a shorter digest (threshold pressure).
    pub aggressive: bool,
}

/// Produces a digest of a previous summary plus older turns.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Fold `request` into a single digest string.
    async fn summarize(&self, request: SummaryRequest<'_>) -> Result<String, SummarizeError>;
}

/// Summarization failures.
#[derive(Debug, thiserror::Error)]
pub enum SummarizeError {
    /// The model call failed.
    #[error("summarizer call failed: {0}")]
    Provider(#[from] ProviderError),

    /// The model answered with nothing.
    #[error("summarizer returned an empty digest")]
    EmptyDigest,
}

// =============================================================================
// Model summarizer
// =============================================================================

/// [`Summarizer`] that asks a chat model for the digest.
pub struct ModelSummarizer {
    model: Arc<dyn TextModel>,
}

impl ModelSummarizer {
    /// Wrap a text model.
    pub fn new(model: Arc<dyn TextModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Summarizer for ModelSummarizer {
    async fn summarize(&self, request: SummaryRequest<'_>) -> Result<String, SummarizeError> {
        let prompt = render_prompt(&request);
        debug!(
            model = self.model.model_id(),
            turns = request.turns.len(),
            aggressive = request.aggressive,
            prompt_len = prompt.len(),
            "requesting digest"
        );
        let messages = [
            ChatMessage::system(SUMMARIZER_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ];
        let digest = self.model.complete(&messages).await?;
        let digest = digest.trim();
        if digest.is_empty() {
            return Err(SummarizeError::EmptyDigest);
        }
        Ok(digest.to_owned())
    }
}

// =============================================================================
// Prompt rendering
// =============================================================================

/// Full digest prompt for `request`.
pub fn render_prompt(request: &SummaryRequest<'_>) -> String {
    let cap = if request.aggressive {
        AGGRESSIVE_DIGEST_TOKENS
    } else {
        STANDARD_DIGEST_TOKENS
    };
    format!(
        "{SUMMARY_INSTRUCTIONS}\n\n\
         Previous summary (if any):\n{}\n\n\
         New conversation to summarize:\n{}\n\n\
         Provide a concise summary (max {cap} tokens) that captures the essential context.",
        request.previous.unwrap_or(NO_PREVIOUS_SUMMARY),
        render_transcript(request.turns),
    )
}

/// `[timestamp] ROLE: content` per turn, separated by blank lines.
pub fn render_transcript(turns: &[Turn]) -> String {
    let mut out = String::new();
    for (i, turn) in turns.iter().enumerate() {
        if i > 0 {
            out.push_str("\n\n");
        }
        let _ = write!(
            out,
            "[{}] {}: {}",
            turn.timestamp.to_rfc3339(),
            turn.role.as_str().to_uppercase(),
            truncate(&turn.content, SUMMARIZER_TURN_TEXT_LIMIT),
        );
    }
    out
}

fn truncate(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use quibbler_llm::ProviderResult;
    use std::sync::Mutex;

    struct CannedModel {
        reply: ProviderResult<String>,
        prompts: Mutex<Vec<String>>,
    }

    impl CannedModel {
        fn ok(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TextModel for CannedModel {
        fn model_id(&self) -> &str {
            "canned"
        }

        async fn complete(&self, messages: &[ChatMessage]) -> ProviderResult<String> {
            self.prompts
                .lock()
                .unwrap()
                .push(messages.last().unwrap().content.clone());
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(_) => Err(ProviderError::Other {
                    message: "boom".into(),
                }),
            }
        }
    }

    fn request<'a>(previous: Option<&'a str>, turns: &'a [Turn]) -> SummaryRequest<'a> {
        SummaryRequest {
            previous,
            turns,
            aggressive: false,
        }
    }

    #[test]
    fn prompt_without_previous_summary() {
        let turns = [Turn::user("add a cache")];
        let prompt = render_prompt(&request(None, &turns));
        assert!(prompt.starts_with("Summarize this code review conversation history"));
        assert!(prompt.contains("Previous summary (if any):\nNone\n\n"));
        assert!(prompt.contains("USER: add a cache"));
        assert!(prompt.ends_with("(max 500 tokens) that captures the essential context."));
    }

    #[test]
    fn aggressive_prompt_asks_for_less() {
        let turns = [Turn::user("x")];
        let prompt = render_prompt(&SummaryRequest {
            previous: Some("old"),
            turns: &turns,
            aggressive: true,
        });
        assert!(prompt.contains("Previous summary (if any):\nold\n\n"));
        assert!(prompt.contains("max 200 tokens"));
    }

    #[test]
    fn transcript_joins_with_blank_lines() {
        let transcript = render_transcript(&[Turn::user("a"), Turn::review("b")]);
        let blocks: Vec<&str> = transcript.split("\n\n").collect();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].ends_with("USER: a"));
        assert!(blocks[1].ends_with("REVIEW: b"));
    }

    #[test]
    fn long_turn_truncated_on_char_boundary() {
        let content = "é".repeat(SUMMARIZER_TURN_TEXT_LIMIT);
        let transcript = render_transcript(&[Turn::tool("Write", content)]);
        assert!(transcript.len() < SUMMARIZER_TURN_TEXT_LIMIT + 64);
    }

    #[tokio::test]
    async fn model_summarizer_trims_digest() {
        let model = CannedModel::ok("  digest text \n");
        let summarizer = ModelSummarizer::new(model.clone());
        let turns = [Turn::user("a")];
        let digest = summarizer.summarize(request(None, &turns)).await.unwrap();
        assert_eq!(digest, "digest text");
        assert_eq!(model.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_digest_is_an_error() {
        let summarizer = ModelSummarizer::new(CannedModel::ok("   "));
        let turns = [Turn::user("a")];
        let err = summarizer.summarize(request(None, &turns)).await.unwrap_err();
        assert_matches!(err, SummarizeError::EmptyDigest);
    }

    #[tokio::test]
    async fn provider_failure_propagates() {
        let model = Arc::new(CannedModel {
            reply: Err(ProviderError::Other {
                message: "down".into(),
            }),
            prompts: Mutex::new(Vec::new()),
        });
        let summarizer = ModelSummarizer::new(model);
        let turns = [Turn::user("a")];
        let err = summarizer.summarize(request(None, &turns)).await.unwrap_err();
        assert_matches!(err, SummarizeError::Provider(_));
    }
}
