//! Rendering of events into conversation turns.

use chrono::SecondsFormat;
use quibbler_core::{EventType, InboundEvent, Role, Turn};
use serde_json::Value;

/// Payload key carrying the user's instructions in a review request.
pub const USER_INSTRUCTIONS_KEY: &str = "user_instructions";
/// Payload key carrying the agent's change summary in a review request.
pub const AGENT_PLAN_KEY: &str = "agent_plan";

/// `HOOK EVENT: <type>` header, timestamp, and the pretty-printed payload.
pub fn render_event(event: &InboundEvent) -> String {
    let pretty = serde_json::to_string_pretty(&event.payload)
        .unwrap_or_else(|_| event.payload.to_string());
    format!(
        "HOOK EVENT: {}\ntime: {}\n\n```json\n{pretty}\n```",
        event.event_type,
        event.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
    )
}

/// Body of a synchronous review request.
pub fn render_review_request(user_instructions: &str, agent_plan: &str) -> String {
    format!(
        "## Review Request\n\n\
         **User Instructions:**\n{}\n\n\
         **Agent's Completed Changes:**\n{}\n\n\
         Please review the completed changes above. Check them against the user's \
         instructions, the project rules, and the conversation so far.",
        user_instructions.trim(),
        agent_plan.trim(),
    )
}

/// The turn recorded for `event`.
pub fn turn_for_event(event: &InboundEvent) -> Turn {
    let content = if event.event_type == EventType::ReviewRequest {
        let field = |key| event.payload.get(key).and_then(Value::as_str).unwrap_or("");
        render_review_request(field(USER_INSTRUCTIONS_KEY), field(AGENT_PLAN_KEY))
    } else {
        render_event(event)
    };
    let mut turn = Turn::new(Role::User, content).with_timestamp(event.timestamp);
    if event.event_type.is_tool_use() && event.tool_name.is_some() {
        turn.role = Role::Tool;
        turn.tool_name.clone_from(&event.tool_name);
    }
    turn
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn at_noon(event: InboundEvent) -> InboundEvent {
        event.with_timestamp(Utc.with_ymd_and_hms(2025, 1, 2, 12, 0, 0).unwrap())
    }

    #[test]
    fn hook_event_format() {
        let event = at_noon(InboundEvent::new(
            EventType::PostToolUse,
            "s",
            "/p",
            json!({"tool_name": "Edit"}),
        ));
        assert_eq!(
            render_event(&event),
            "HOOK EVENT: PostToolUse\ntime: 2025-01-02T12:00:00Z\n\n```json\n{\n  \"tool_name\": \"Edit\"\n}\n```"
        );
    }

    #[test]
    fn tool_events_become_tool_turns() {
        let event = InboundEvent::new(EventType::PostToolUse, "s", "/p", json!({"tool_name": "Write"}));
        let turn = turn_for_event(&event);
        assert_eq!(turn.role, Role::Tool);
        assert_eq!(turn.tool_name.as_deref(), Some("Write"));
        assert_eq!(turn.timestamp, event.timestamp);
    }

    #[test]
    fn prompt_events_become_user_turns() {
        let event = InboundEvent::new(EventType::UserPromptSubmit, "s", "/p", json!({"prompt": "hi"}));
        let turn = turn_for_event(&event);
        assert_eq!(turn.role, Role::User);
        assert!(turn.content.starts_with("HOOK EVENT: UserPromptSubmit\n"));
    }

    #[test]
    fn review_request_rendering() {
        let event = InboundEvent::new(
            EventType::ReviewRequest,
            "/p",
            "/p",
            json!({"user_instructions": " add caching ", "agent_plan": "Edited cache.rs"}),
        );
        let turn = turn_for_event(&event);
        assert_eq!(turn.role, Role::User);
        assert!(turn.content.starts_with(
            "## Review Request\n\n**User Instructions:**\nadd caching\n\n**Agent's Completed Changes:**\nEdited cache.rs"
        ));
    }
}
