//! # Model invocation port
//!
//! The engine hands a bounded [`ReviewRequest`] to a [`ReviewModel`] and gets
//! a [`ReviewReply`] back. [`ChatReviewer`] is the default implementation on
//! top of any [`TextModel`].
//!
//! Message layout sent by [`ChatReviewer`]:
//!
//! ```text
//! [system]    instructions + "## Project Rules" + rules
//! [system]    "CONVERSATION HISTORY SUMMARY:\n<summary>"      (if any)
//! [user]      retained user/tool turns
//! [assistant] retained review turns
//! [user]      latest action
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use quibbler_core::{Materialized, ReviewReply, Role};
use tracing::debug;

use crate::provider::{ChatMessage, ProviderResult, TextModel};
use crate::verdict::parse_reply;

/// Header placed between the instructions and the project rules.
pub const RULES_HEADER: &str = "## Project Rules";
/// Prefix of the summary message.
pub const SUMMARY_HEADER: &str = "CONVERSATION HISTORY SUMMARY:";

/// Everything one review invocation sees.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewRequest {
    /// Reviewer instructions for the current mode.
    pub system_instructions: String,
    /// Project rules, kept outside the summarizable window.
    pub rules_text: Arc<str>,
    /// Summary plus retained turns preceding the latest action.
    pub materialized_context: Materialized,
    /// Rendered description of the event under review.
    pub latest_action_description: String,
}

impl ReviewRequest {
    /// Render as chat messages.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.materialized_context.turns.len() + 3);

        let rules = self.rules_text.trim();
        let system = if rules.is_empty() {
            self.system_instructions.clone()
        } else {
            format!("{}\n\n{RULES_HEADER}\n\n{rules}", self.system_instructions)
        };
        messages.push(ChatMessage::system(system));

        if let Some(summary) = &self.materialized_context.summary {
            messages.push(ChatMessage::system(format!("{SUMMARY_HEADER}\n{summary}")));
        }

        for turn in &self.materialized_context.turns {
            messages.push(match turn.role {
                Role::Review => ChatMessage::assistant(turn.content.clone()),
                Role::User | Role::Tool => ChatMessage::user(turn.content.clone()),
            });
        }

        messages.push(ChatMessage::user(self.latest_action_description.clone()));
        messages
    }
}

/// Produces a verdict for a bounded review request.
#[async_trait]
pub trait ReviewModel: Send + Sync {
    /// Run one review.
    async fn review(&self, request: &ReviewRequest) -> ProviderResult<ReviewReply>;
}

/// [`ReviewModel`] backed by a chat completion model.
pub struct ChatReviewer {
    model: Arc<dyn TextModel>,
}

impl ChatReviewer {
    /// Wrap a text model.
    pub fn new(model: Arc<dyn TextModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl ReviewModel for ChatReviewer {
    async fn review(&self, request: &ReviewRequest) -> ProviderResult<ReviewReply> {
        let messages = request.to_messages();
        debug!(
            model = self.model.model_id(),
            message_count = messages.len(),
            "invoking reviewer"
        );
        let text = self.model.complete(&messages).await?;
        Ok(parse_reply(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChatRole;
    use quibbler_core::{Turn, Verdict};
    use std::sync::Mutex;

    struct Recorder {
        reply: String,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl TextModel for Recorder {
        fn model_id(&self) -> &str {
            "fake"
        }

        async fn complete(&self, messages: &[ChatMessage]) -> ProviderResult<String> {
            self.seen.lock().unwrap().push(messages.to_vec());
            Ok(self.reply.clone())
        }
    }

    fn request(rules: &str, summary: Option<&str>, turns: Vec<Turn>) -> ReviewRequest {
        ReviewRequest {
            system_instructions: "You review code.".into(),
            rules_text: Arc::from(rules),
            materialized_context: Materialized {
                summary: summary.map(String::from),
                turns,
            },
            latest_action_description: "HOOK EVENT: PostToolUse".into(),
        }
    }

    #[test]
    fn rules_appended_to_system_message() {
        let messages = request("### Rule: no mocks", None, vec![]).to_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, ChatRole::System);
        assert_eq!(
            messages[0].content,
            "You review code.\n\n## Project Rules\n\n### Rule: no mocks"
        );
        assert_eq!(messages[1].content, "HOOK EVENT: PostToolUse");
    }

    #[test]
    fn empty_rules_leave_instructions_untouched() {
        let messages = request("  \n", None, vec![]).to_messages();
        assert_eq!(messages[0].content, "You review code.");
    }

    #[test]
    fn summary_and_turn_roles() {
        let messages = request(
            "",
            Some("earlier issues"),
            vec![Turn::user("prompt"), Turn::tool("Edit", "diff"), Turn::review("flagged")],
        )
        .to_messages();
        let roles: Vec<ChatRole> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                ChatRole::System,
                ChatRole::System,
                ChatRole::User,
                ChatRole::User,
                ChatRole::Assistant,
                ChatRole::User,
            ]
        );
        assert_eq!(messages[1].content, "CONVERSATION HISTORY SUMMARY:\nearlier issues");
    }

    #[tokio::test]
    async fn chat_reviewer_parses_verdict() {
        let recorder = Arc::new(Recorder {
            reply: "VERDICT: FLAG\nTests were skipped.".into(),
            seen: Mutex::new(Vec::new()),
        });
        let reviewer = ChatReviewer::new(recorder.clone());
        let reply = reviewer.review(&request("", None, vec![])).await.unwrap();
        assert_eq!(reply.verdict, Verdict::Flag);
        assert_eq!(reply.feedback_text, "Tests were skipped.");
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }
}
