//! Verdict extraction from free-form reviewer text.
//!
//! Reviewers are asked to open with `VERDICT: APPROVE` or `VERDICT: FLAG`.
//! When that line is present it decides the verdict and is stripped from
//! the feedback. Otherwise the first line is checked for the common
//! `✅ APPROVED` / `❌` markers. Anything else non-empty is a flag, and an
//! empty reply is an approval.

use std::sync::LazyLock;

use quibbler_core::{ReviewReply, Verdict};
use regex::Regex;

/// Marker line the reviewer is instructed to emit.
pub const VERDICT_PREFIX: &str = "VERDICT:";

static VERDICT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[\s*#_>`]*verdict\s*:\s*[*_`]*\s*(approved?|flag(?:ged)?)\b")
        .expect("verdict pattern is valid")
});

/// Parse a reviewer reply into a [`ReviewReply`].
pub fn parse_reply(text: &str) -> ReviewReply {
    let trimmed = text.trim();
    let Some(first_line) = trimmed.lines().map(str::trim).find(|l| !l.is_empty()) else {
        return ReviewReply::approve(String::new());
    };

    if let Some(caps) = VERDICT_LINE.captures(first_line) {
        let verdict = if caps[1].to_ascii_lowercase().starts_with("approve") {
            Verdict::Approve
        } else {
            Verdict::Flag
        };
        let feedback = trimmed
            .split_once('\n')
            .map_or("", |(_, rest)| rest)
            .trim()
            .to_owned();
        return ReviewReply {
            verdict,
            feedback_text: feedback,
        };
    }

    let upper = first_line.to_uppercase();
    if first_line.starts_with('✅') || upper.starts_with("APPROVED") {
        return ReviewReply::approve(trimmed);
    }
    ReviewReply::flag(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_approve_line_stripped() {
        let reply = parse_reply("VERDICT: APPROVE\n\nLooks solid.");
        assert_eq!(reply.verdict, Verdict::Approve);
        assert_eq!(reply.feedback_text, "Looks solid.");
    }

    #[test]
    fn explicit_flag_with_markdown_emphasis() {
        let reply = parse_reply("**VERDICT: FLAG**\n1. Tests were mocked");
        assert_eq!(reply.verdict, Verdict::Flag);
        assert_eq!(reply.feedback_text, "1. Tests were mocked");
    }

    #[test]
    fn case_insensitive_and_leading_blank_lines() {
        let reply = parse_reply("\n\n  verdict: approved\n");
        assert_eq!(reply.verdict, Verdict::Approve);
        assert!(reply.feedback_text.is_empty());
    }

    #[test]
    fn approved_marker_without_verdict_line() {
        let reply = parse_reply("✅ APPROVED\n\nWell done.");
        assert_eq!(reply.verdict, Verdict::Approve);
        assert!(reply.feedback_text.contains("Well done."));
    }

    #[test]
    fn issues_marker_is_flag() {
        let reply = parse_reply("❌ ISSUES DETECTED\n\n1. Missing error handling");
        assert_eq!(reply.verdict, Verdict::Flag);
    }

    #[test]
    fn unstructured_text_is_flag() {
        let reply = parse_reply("You claimed tests pass but never ran them.");
        assert_eq!(reply.verdict, Verdict::Flag);
        assert_eq!(reply.feedback_text, "You claimed tests pass but never ran them.");
    }

    #[test]
    fn empty_reply_is_approval() {
        let reply = parse_reply("   \n");
        assert_eq!(reply.verdict, Verdict::Approve);
        assert!(reply.feedback_text.is_empty());
    }
}
