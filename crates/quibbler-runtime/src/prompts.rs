//! Reviewer system prompts.
//!
//! A base text (built in, or `$QUIBBLER_HOME/prompt.md` when present) plus a
//! section for the delivery mode and the verdict protocol. Project rules are
//! not part of these instructions; they travel separately.

use std::io::ErrorKind;
use std::path::Path;

use quibbler_core::paths;
use quibbler_llm::verdict::VERDICT_PREFIX;
use tracing::{debug, warn};

const BUILTIN_BASE: &str = "\
You are Quibbler, a skeptical code reviewer watching a coding agent work.

Assume the agent will cut corners: skip verification, claim results it never \
observed, mock what it should test, invent new patterns instead of following \
the project's existing ones, or drift from what the user actually asked for. \
Your job is to catch this early and say so plainly.

Check every change against the user's request, the project rules, and what \
the conversation so far shows about the codebase. Challenge unsupported \
claims. Keep feedback short, specific, and actionable.";

const HOOK_SECTION: &str = "\
## Mode: observer

You receive the agent's hook events as they happen (prompts, tool calls, \
stops). Most events need no comment. Speak up only when the latest action \
shows a real problem; your feedback is handed to the agent before its next \
step.";

const TOOL_SECTION: &str = "\
## Mode: post-implementation review

The agent has finished a change and asked for review. You receive the user's \
instructions and the agent's summary of what it changed. Decide whether the \
change is ready or must be revised.";

/// How the review will be delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptMode {
    /// Asynchronous hook observer.
    Hook,
    /// Synchronous tool-call review.
    Tool,
}

/// Resolved reviewer instructions for both modes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemPrompts {
    hook: String,
    tool: String,
}

impl SystemPrompts {
    /// Prompts built on `base`.
    pub fn with_base(base: &str) -> Self {
        let base = base.trim();
        Self {
            hook: compose(base, HOOK_SECTION),
            tool: compose(base, TOOL_SECTION),
        }
    }

    /// Prompts built on the compiled-in base text.
    pub fn builtin() -> Self {
        Self::with_base(BUILTIN_BASE)
    }

    /// Prompts using `<home>/prompt.md` as the base when it exists and is
    /// non-empty.
    pub fn load(quibbler_home: &Path) -> Self {
        let path = quibbler_home.join(paths::PROMPT_FILE);
        match std::fs::read_to_string(&path) {
            Ok(text) if !text.trim().is_empty() => {
                debug!(path = %path.display(), "using custom base prompt");
                Self::with_base(&text)
            }
            Ok(_) => Self::builtin(),
            Err(error) if error.kind() == ErrorKind::NotFound => Self::builtin(),
            Err(error) => {
                warn!(path = %path.display(), %error, "failed to read base prompt, using built-in");
                Self::builtin()
            }
        }
    }

    /// Instructions for `mode`.
    pub fn for_mode(&self, mode: PromptMode) -> &str {
        match mode {
            PromptMode::Hook => &self.hook,
            PromptMode::Tool => &self.tool,
        }
    }
}

impl Default for SystemPrompts {
    fn default() -> Self {
        Self::builtin()
    }
}

fn compose(base: &str, section: &str) -> String {
    format!(
        "{base}\n\n{section}\n\n\
         ## Response format\n\n\
         Start your reply with exactly one line, `{VERDICT_PREFIX} APPROVE` or \
         `{VERDICT_PREFIX} FLAG`. Approve when nothing needs to change. Flag when the \
         agent must act, then list the issues, most important first."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn both_modes_state_verdict_protocol() {
        let prompts = SystemPrompts::builtin();
        for mode in [PromptMode::Hook, PromptMode::Tool] {
            let text = prompts.for_mode(mode);
            assert!(text.starts_with("You are Quibbler"));
            assert!(text.contains("`VERDICT: APPROVE`"));
            assert!(text.contains("`VERDICT: FLAG`"));
        }
        assert!(prompts.for_mode(PromptMode::Hook).contains("## Mode: observer"));
        assert!(prompts.for_mode(PromptMode::Tool).contains("post-implementation"));
    }

    #[test]
    fn custom_base_replaces_builtin() {
        let home = TempDir::new().unwrap();
        std::fs::write(home.path().join("prompt.md"), "Be terse.\n").unwrap();
        let prompts = SystemPrompts::load(home.path());
        let text = prompts.for_mode(PromptMode::Hook);
        assert!(text.starts_with("Be terse.\n\n## Mode: observer"));
        assert!(!text.contains("You are Quibbler"));
    }

    #[test]
    fn missing_or_blank_file_uses_builtin() {
        let home = TempDir::new().unwrap();
        assert_eq!(SystemPrompts::load(home.path()), SystemPrompts::builtin());
        std::fs::write(home.path().join("prompt.md"), "  \n").unwrap();
        assert_eq!(SystemPrompts::load(home.path()), SystemPrompts::builtin());
    }
}
