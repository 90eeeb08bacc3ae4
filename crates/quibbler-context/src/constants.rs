//! Constants for context management.

// =============================================================================
// Token estimation
// =============================================================================

/// Characters per token used by the byte-length estimator.
pub const CHARS_PER_TOKEN: u64 = 4;

// =============================================================================
// Summarization
// =============================================================================

/// System prompt for digest requests.
pub const SUMMARIZER_SYSTEM_PROMPT: &str =
    "You are a precise conversation summarizer for code reviews.";

/// Opening of every digest request.
pub const SUMMARY_INSTRUCTIONS: &str = "Summarize this code review conversation history \
concisely, preserving:
1. Key issues identified
2. Patterns or rules learned
3. Important decisions made
4. Recurring themes";

/// Token cap requested for a regular digest.
pub const STANDARD_DIGEST_TOKENS: u32 = 500;

/// Token cap requested when compacting under threshold pressure.
pub const AGGRESSIVE_DIGEST_TOKENS: u32 = 200;

/// Placeholder when there is no previous summary.
pub const NO_PREVIOUS_SUMMARY: &str = "None";

/// Longest slice of a single turn quoted into a digest request.
pub const SUMMARIZER_TURN_TEXT_LIMIT: usize = 8_000;
