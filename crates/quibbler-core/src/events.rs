//! Inbound agent events.
//!
//! Every transport (HTTP hook server, stdio tool server) converts what it
//! receives into an [`InboundEvent`] before handing it to the engine. Event
//! names follow the agent hook vocabulary (`PostToolUse`, `Stop`, ...);
//! names the engine does not know are preserved in [`EventType::Other`].

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Agent lifecycle event type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    /// Before a tool is executed.
    PreToolUse,
    /// After a tool has executed.
    PostToolUse,
    /// When the agent stops responding.
    Stop,
    /// When a subagent stops.
    SubagentStop,
    /// When a session starts.
    SessionStart,
    /// When a session ends.
    SessionEnd,
    /// When a user submits a prompt.
    UserPromptSubmit,
    /// Before the agent compacts its own context.
    PreCompact,
    /// Notification event.
    Notification,
    /// Explicit review request from the synchronous tool-call path.
    ReviewRequest,
    /// Any event name not listed above.
    Other(String),
}

impl EventType {
    /// Parse a hook event name. Unknown names become [`EventType::Other`].
    #[must_use]
    pub fn from_hook_name(name: &str) -> Self {
        match name {
            "PreToolUse" => Self::PreToolUse,
            "PostToolUse" => Self::PostToolUse,
            "Stop" => Self::Stop,
            "SubagentStop" => Self::SubagentStop,
            "SessionStart" => Self::SessionStart,
            "SessionEnd" => Self::SessionEnd,
            "UserPromptSubmit" => Self::UserPromptSubmit,
            "PreCompact" => Self::PreCompact,
            "Notification" => Self::Notification,
            "ReviewRequest" => Self::ReviewRequest,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Canonical event name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::PreToolUse => "PreToolUse",
            Self::PostToolUse => "PostToolUse",
            Self::Stop => "Stop",
            Self::SubagentStop => "SubagentStop",
            Self::SessionStart => "SessionStart",
            Self::SessionEnd => "SessionEnd",
            Self::UserPromptSubmit => "UserPromptSubmit",
            Self::PreCompact => "PreCompact",
            Self::Notification => "Notification",
            Self::ReviewRequest => "ReviewRequest",
            Self::Other(name) => name,
        }
    }

    /// Session start/end: these only touch session metadata.
    #[must_use]
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::SessionStart | Self::SessionEnd)
    }

    /// Events describing a tool invocation.
    #[must_use]
    pub fn is_tool_use(&self) -> bool {
        matches!(self, Self::PreToolUse | Self::PostToolUse)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for EventType {
    fn from(name: String) -> Self {
        Self::from_hook_name(&name)
    }
}

impl From<EventType> for String {
    fn from(event_type: EventType) -> Self {
        event_type.as_str().to_owned()
    }
}

/// One event delivered to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// What happened.
    pub event_type: EventType,
    /// Tool involved, for tool-use events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Partition key: a session id (hook mode) or project path (tool mode).
    pub context_key: String,
    /// Project directory that rules and feedback files resolve against.
    pub project_root: PathBuf,
    /// Raw event payload as sent by the agent.
    pub payload: Value,
    /// When the event was received.
    pub timestamp: DateTime<Utc>,
}

impl InboundEvent {
    /// Build an event received now. `tool_name` is lifted from
    /// `payload.tool_name` when present.
    pub fn new(
        event_type: EventType,
        context_key: impl Into<String>,
        project_root: impl Into<PathBuf>,
        payload: Value,
    ) -> Self {
        let tool_name = payload
            .get("tool_name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(str::to_owned);
        Self {
            event_type,
            tool_name,
            context_key: context_key.into(),
            project_root: project_root.into(),
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Override the tool name.
    #[must_use]
    pub fn with_tool_name(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    /// Override the receive timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}
