//! Event triage.
//!
//! Decides, per inbound event, whether it is dropped, recorded for context,
//! or recorded and reviewed. The decision depends only on the event and the
//! policy; the engine applies the stopped-session downgrade on top.

use std::collections::HashSet;

use quibbler_core::{EventType, InboundEvent};
use quibbler_settings::ReviewSettings;

/// Triage outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Decision {
    /// No store mutation, no invocation.
    Skip,
    /// Append a turn for context continuity only.
    RecordOnly,
    /// Append a turn and invoke the reviewer.
    RecordAndReview,
}

impl Decision {
    /// Label for logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::RecordOnly => "record_only",
            Self::RecordAndReview => "record_and_review",
        }
    }

    /// True unless the event is skipped.
    #[must_use]
    pub fn records(self) -> bool {
        !matches!(self, Self::Skip)
    }
}

/// Which events deserve a review.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriagePolicy {
    smart_triggers: bool,
    mutating_tools: HashSet<String>,
}

impl TriagePolicy {
    /// Create a policy.
    pub fn new<I, S>(smart_triggers: bool, mutating_tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            smart_triggers,
            mutating_tools: mutating_tools.into_iter().map(Into::into).collect(),
        }
    }

    /// Policy from the review settings.
    pub fn from_settings(settings: &ReviewSettings) -> Self {
        Self::new(settings.smart_triggers, settings.mutating_tools.iter().cloned())
    }

    /// Whether `tool_name` is write/edit-class.
    pub fn is_mutating(&self, tool_name: Option<&str>) -> bool {
        tool_name.is_some_and(|name| self.mutating_tools.contains(name))
    }

    /// Classify one event.
    pub fn decide(&self, event: &InboundEvent) -> Decision {
        let event_type = &event.event_type;
        if *event_type == EventType::ReviewRequest {
            return Decision::RecordAndReview;
        }
        if event_type.is_lifecycle() {
            return if self.smart_triggers {
                Decision::Skip
            } else {
                Decision::RecordOnly
            };
        }
        if !self.smart_triggers {
            return Decision::RecordAndReview;
        }
        match event_type {
            EventType::PostToolUse if self.is_mutating(event.tool_name.as_deref()) => {
                Decision::RecordAndReview
            }
            EventType::PostToolUse => Decision::RecordOnly,
            EventType::UserPromptSubmit | EventType::Stop => Decision::RecordAndReview,
            _ => Decision::Skip,
        }
    }
}

impl Default for TriagePolicy {
    fn default() -> Self {
        Self::from_settings(&ReviewSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn event(event_type: EventType, tool: Option<&str>) -> InboundEvent {
        let payload = tool.map_or_else(|| json!({}), |t| json!({ "tool_name": t }));
        InboundEvent::new(event_type, "sess", "/proj", payload)
    }

    // -- smart triggers --

    #[test]
    fn mutating_tool_is_reviewed() {
        let policy = TriagePolicy::default();
        for tool in ["Write", "Edit", "MultiEdit", "NotebookEdit"] {
            assert_eq!(
                policy.decide(&event(EventType::PostToolUse, Some(tool))),
                Decision::RecordAndReview,
                "{tool}"
            );
        }
    }

    #[test]
    fn read_only_tool_is_recorded() {
        let policy = TriagePolicy::default();
        assert_eq!(
            policy.decide(&event(EventType::PostToolUse, Some("Read"))),
            Decision::RecordOnly
        );
        assert_eq!(
            policy.decide(&event(EventType::PostToolUse, None)),
            Decision::RecordOnly
        );
    }

    #[test]
    fn prompt_and_stop_are_reviewed() {
        let policy = TriagePolicy::default();
        assert_eq!(
            policy.decide(&event(EventType::UserPromptSubmit, None)),
            Decision::RecordAndReview
        );
        assert_eq!(policy.decide(&event(EventType::Stop, None)), Decision::RecordAndReview);
    }

    #[test]
    fn noise_is_skipped() {
        let policy = TriagePolicy::default();
        for event_type in [
            EventType::PreToolUse,
            EventType::Notification,
            EventType::SubagentStop,
            EventType::PreCompact,
            EventType::SessionStart,
            EventType::SessionEnd,
            EventType::Other("Custom".into()),
        ] {
            assert_eq!(
                policy.decide(&event(event_type.clone(), Some("Write"))),
                Decision::Skip,
                "{event_type}"
            );
        }
    }

    #[test]
    fn review_request_always_reviewed() {
        let policy = TriagePolicy::new(false, Vec::<String>::new());
        assert_eq!(
            policy.decide(&event(EventType::ReviewRequest, None)),
            Decision::RecordAndReview
        );
    }

    // -- smart triggers off --

    #[test]
    fn everything_recorded_without_smart_triggers() {
        let policy = TriagePolicy::new(false, ["Write"]);
        assert_eq!(
            policy.decide(&event(EventType::PreToolUse, Some("Read"))),
            Decision::RecordAndReview
        );
        assert_eq!(
            policy.decide(&event(EventType::SessionStart, None)),
            Decision::RecordOnly
        );
    }

    #[test]
    fn custom_mutating_list() {
        let policy = TriagePolicy::new(true, ["Bash"]);
        assert_eq!(
            policy.decide(&event(EventType::PostToolUse, Some("Bash"))),
            Decision::RecordAndReview
        );
        assert_eq!(
            policy.decide(&event(EventType::PostToolUse, Some("Write"))),
            Decision::RecordOnly
        );
    }

    proptest! {
        #[test]
        fn tool_completion_classification(tool in "[A-Za-z]{1,12}") {
            let policy = TriagePolicy::default();
            let decision = policy.decide(&event(EventType::PostToolUse, Some(&tool)));
            if policy.is_mutating(Some(&tool)) {
                prop_assert_eq!(decision, Decision::RecordAndReview);
            } else {
                prop_assert_ne!(decision, Decision::RecordAndReview);
                prop_assert!(decision.records());
            }
        }
    }
}
