//! # Model capacity registry
//!
//! Context window sizes for reviewing models. Lookups tolerate a
//! `provider/` prefix and a trailing `-YYYYMMDD` date suffix.

use tracing::warn;

/// Capacity assumed for models missing from the table.
pub const DEFAULT_CONTEXT_CAPACITY: u64 = 200_000;

const CLAUDE_CAPACITY: u64 = 200_000;
const GPT_4O_CAPACITY: u64 = 128_000;

/// Known model ids and their context window in tokens.
const KNOWN_MODELS: &[(&str, u64)] = &[
    ("claude-haiku-4-5", CLAUDE_CAPACITY),
    ("claude-sonnet-4-5", CLAUDE_CAPACITY),
    ("claude-sonnet-4", CLAUDE_CAPACITY),
    ("claude-opus-4-5", CLAUDE_CAPACITY),
    ("claude-opus-4-1", CLAUDE_CAPACITY),
    ("claude-opus-4", CLAUDE_CAPACITY),
    ("claude-3-7-sonnet", CLAUDE_CAPACITY),
    ("claude-3-5-haiku", CLAUDE_CAPACITY),
    ("gpt-4o", GPT_4O_CAPACITY),
    ("gpt-4o-mini", GPT_4O_CAPACITY),
];

/// Strip the explicit provider prefix and any date suffix.
///
/// `"anthropic/claude-haiku-4-5-20251001"` → `"claude-haiku-4-5"`
pub fn normalize_model_id(model_id: &str) -> &str {
    let bare = model_id.split_once('/').map_or(model_id, |(_, model)| model);
    match bare.rsplit_once('-') {
        Some((stem, suffix)) if suffix.len() == 8 && suffix.bytes().all(|b| b.is_ascii_digit()) => {
            stem
        }
        _ => bare,
    }
}

/// Context capacity for a known model, if any.
pub fn known_capacity(model_id: &str) -> Option<u64> {
    let bare = normalize_model_id(model_id);
    KNOWN_MODELS
        .iter()
        .find(|(id, _)| *id == bare)
        .map(|(_, capacity)| *capacity)
}

/// Context capacity for `model_id`, with an explicit override taking
/// precedence. Unknown models fall back to [`DEFAULT_CONTEXT_CAPACITY`].
pub fn context_capacity(model_id: &str, override_tokens: Option<u64>) -> u64 {
    if let Some(tokens) = override_tokens.filter(|t| *t > 0) {
        return tokens;
    }
    known_capacity(model_id).unwrap_or_else(|| {
        warn!(
            model = model_id,
            fallback = DEFAULT_CONTEXT_CAPACITY,
            "unknown model, assuming default context capacity"
        );
        DEFAULT_CONTEXT_CAPACITY
    })
}
