//! Conversation turns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User prompt or review request.
    User,
    /// Record of a tool invocation.
    Tool,
    /// Reviewer response.
    Review,
}

impl Role {
    /// Lowercase role name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Tool => "tool",
            Self::Review => "review",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded unit of conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Producer of this turn.
    pub role: Role,
    /// Rendered text.
    pub content: String,
    /// Tool involved, for tool turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// When the turn was recorded.
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Create a turn stamped with the current time.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_name: None,
            timestamp: Utc::now(),
        }
    }

    /// User turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Tool turn.
    pub fn tool(tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content).with_tool_name(tool_name)
    }

    /// Reviewer turn.
    pub fn review(content: impl Into<String>) -> Self {
        Self::new(Role::Review, content)
    }

    /// Attach a tool name.
    #[must_use]
    pub fn with_tool_name(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    /// Override the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Context as sent to a model: the rolling summary followed by retained turns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Materialized {
    /// Digest of everything older than `turns`.
    pub summary: Option<String>,
    /// Retained turns, oldest first.
    pub turns: Vec<Turn>,
}

impl Materialized {
    /// Most recent turn, if any.
    #[must_use]
    pub fn latest(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Detach the most recent turn, leaving the history that precedes it.
    #[must_use]
    pub fn split_latest(mut self) -> (Self, Option<Turn>) {
        let latest = self.turns.pop();
        (self, latest)
    }

    /// True when there is neither a summary nor any turn.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.summary.is_none() && self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_role() {
        assert_eq!(Turn::user("hi").role, Role::User);
        assert_eq!(Turn::review("ok").role, Role::Review);
        let tool = Turn::tool("Edit", "diff");
        assert_eq!(tool.role, Role::Tool);
        assert_eq!(tool.tool_name.as_deref(), Some("Edit"));
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Review).unwrap(), "\"review\"");
        assert_eq!(Role::Tool.to_string(), "tool");
    }

    #[test]
    fn split_latest_detaches_last_turn() {
        let view = Materialized {
            summary: Some("digest".into()),
            turns: vec![Turn::user("a"), Turn::user("b")],
        };
        let (history, latest) = view.split_latest();
        assert_eq!(latest.unwrap().content, "b");
        assert_eq!(history.turns.len(), 1);
        assert_eq!(history.summary.as_deref(), Some("digest"));
    }

    #[test]
    fn empty_view() {
        assert!(Materialized::default().is_empty());
        let (history, latest) = Materialized::default().split_latest();
        assert!(history.is_empty());
        assert!(latest.is_none());
    }
}
