//! Token estimation: `ceil(bytes / 4)`, monotone in content length.

use quibbler_core::Turn;

use crate::constants::CHARS_PER_TOKEN;

/// Estimated tokens for a piece of text.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(CHARS_PER_TOKEN)
}

/// Estimated tokens for a turn's content.
#[must_use]
pub fn estimate_turn(turn: &Turn) -> u64 {
    estimate_tokens(&turn.content)
}
