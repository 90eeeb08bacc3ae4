//! Per-session conversation store.
//!
//! Holds the rolling summary and the ordered retained turns, with a parallel
//! token cache so [`ConversationStore::estimated_size`] never re-scans
//! content. Only the compaction engine may fold turns into the summary.

use quibbler_core::{Materialized, Turn};

use crate::tokens::{estimate_tokens, estimate_turn};

/// Ordered turns plus an optional digest of everything older.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConversationStore {
    summary: Option<String>,
    summary_tokens: u64,
    turns: Vec<Turn>,
    /// Token estimates parallel to `turns`.
    token_cache: Vec<u64>,
    turn_tokens: u64,
}

impl ConversationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn. It becomes the latest turn.
    pub fn append(&mut self, turn: Turn) {
        let tokens = estimate_turn(&turn);
        self.turn_tokens += tokens;
        self.token_cache.push(tokens);
        self.turns.push(turn);
    }

    /// Snapshot of the summary and retained turns.
    #[must_use]
    pub fn materialize(&self) -> Materialized {
        Materialized {
            summary: self.summary.clone(),
            turns: self.turns.clone(),
        }
    }

    /// Number of retained turns.
    #[must_use]
    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    /// True when the store holds neither a summary nor a turn.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.summary.is_none() && self.turns.is_empty()
    }

    /// Estimated tokens of the summary plus all retained turns.
    #[must_use]
    pub fn estimated_size(&self) -> u64 {
        self.summary_tokens + self.turn_tokens
    }

    /// Current summary, if any.
    #[must_use]
    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    /// Retained turns, oldest first.
    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Most recent turn.
    #[must_use]
    pub fn latest(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Replace the summary with `digest` and drop the oldest `count` turns.
    ///
    /// `count` is clamped so the latest turn always survives.
    pub(crate) fn fold_prefix(&mut self, count: usize, digest: String) {
        let count = count.min(self.turns.len().saturating_sub(1));
        let dropped: u64 = self.token_cache.drain(..count).sum();
        let _ = self.turns.drain(..count);
        self.turn_tokens -= dropped;
        self.summary_tokens = estimate_tokens(&digest);
        self.summary = Some(digest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Basics ───────────────────────────────────────────────────────────

    #[test]
    fn new_store_is_empty() {
        let store = ConversationStore::new();
        assert!(store.is_empty());
        assert_eq!(store.turn_count(), 0);
        assert_eq!(store.estimated_size(), 0);
        assert!(store.materialize().is_empty());
    }

    #[test]
    fn append_keeps_order_and_latest() {
        let mut store = ConversationStore::new();
        store.append(Turn::user("first"));
        store.append(Turn::tool("Edit", "second"));
        assert_eq!(store.turn_count(), 2);
        assert_eq!(store.latest().unwrap().content, "second");
        let view = store.materialize();
        assert_eq!(view.turns[0].content, "first");
        assert!(view.summary.is_none());
    }

    #[test]
    fn estimated_size_tracks_appends() {
        let mut store = ConversationStore::new();
        store.append(Turn::user("x".repeat(400)));
        store.append(Turn::user("y".repeat(41)));
        assert_eq!(store.estimated_size(), 100 + 11);
    }

    // ── Folding ──────────────────────────────────────────────────────────

    #[test]
    fn fold_prefix_replaces_summary_and_drops_oldest() {
        let mut store = ConversationStore::new();
        for i in 0..6 {
            store.append(Turn::user(format!("turn {i:02}")));
        }
        store.fold_prefix(4, "d".repeat(8));
        assert_eq!(store.summary(), Some("dddddddd"));
        assert_eq!(store.turn_count(), 2);
        assert_eq!(store.turns()[0].content, "turn 04");
        // 8-byte digest + two 7-byte turns
        assert_eq!(store.estimated_size(), 2 + 2 + 2);
    }

    #[test]
    fn fold_prefix_never_drops_latest() {
        let mut store = ConversationStore::new();
        store.append(Turn::user("a"));
        store.append(Turn::user("b"));
        store.fold_prefix(10, "digest".into());
        assert_eq!(store.turn_count(), 1);
        assert_eq!(store.latest().unwrap().content, "b");
    }

    #[test]
    fn fold_zero_rewrites_summary_only() {
        let mut store = ConversationStore::new();
        store.append(Turn::user("a"));
        store.fold_prefix(0, "first".into());
        store.fold_prefix(0, "second".into());
        assert_eq!(store.summary(), Some("second"));
        assert_eq!(store.turn_count(), 1);
    }
}
