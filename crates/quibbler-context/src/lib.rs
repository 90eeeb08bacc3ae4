//! # quibbler-context
//!
//! Per-session conversation state for the reviewer.
//!
//! - [`conversation_store`]: ordered turns plus a rolling summary, with
//!   cached per-turn token estimates
//! - [`compaction_engine`]: count-based summarization and bounded
//!   token-threshold compaction
//! - [`summarizer`]: the digest port and its model-backed implementation
//! - [`rules`]: project rule files cached across sessions

#![deny(unsafe_code)]

pub mod compaction_engine;
pub mod constants;
pub mod conversation_store;
pub mod rules;
pub mod summarizer;
pub mod tokens;

pub use compaction_engine::{CompactionConfig, CompactionEngine, CompactionReport, Degraded};
pub use conversation_store::ConversationStore;
pub use rules::{CachedRules, RuleCache};
pub use summarizer::{ModelSummarizer, SummarizeError, SummaryRequest, Summarizer};
