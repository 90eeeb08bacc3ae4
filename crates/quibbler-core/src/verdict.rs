//! Review verdicts.

use serde::{Deserialize, Serialize};

/// Structured outcome of a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// The change looks fine.
    Approve,
    /// The reviewer has feedback the agent should act on.
    Flag,
}

impl Verdict {
    /// Lowercase verdict name, also used as a metric label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Flag => "flag",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{verdict, feedback_text}`: returned to synchronous callers and written
/// to the feedback sink in asynchronous mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewReply {
    /// Approve or flag.
    pub verdict: Verdict,
    /// Reviewer text, minus any verdict marker line.
    pub feedback_text: String,
}

impl ReviewReply {
    /// Approving reply.
    pub fn approve(feedback_text: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Approve,
            feedback_text: feedback_text.into(),
        }
    }

    /// Flagging reply.
    pub fn flag(feedback_text: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Flag,
            feedback_text: feedback_text.into(),
        }
    }
}
