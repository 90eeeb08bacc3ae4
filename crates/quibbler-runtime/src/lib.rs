//! # quibbler-runtime
//!
//! The review engine and everything around it.
//!
//! - **Triage**: classifies each inbound event as skip, record-only, or
//!   record-and-review
//! - **Registry**: per-key sessions behind a sharded map, one FIFO critical
//!   section per key, idle eviction
//! - **Engine**: record → compact → review under the per-key lock, bounded by
//!   a global invocation semaphore
//! - **Delivery**: atomic feedback files and a tracked background dispatcher
//!   for the asynchronous path

#![deny(unsafe_code)]

pub mod delivery;
pub mod engine;
pub mod errors;
pub mod format;
pub mod metrics;
pub mod prompts;
pub mod registry;
pub mod triage;

pub use delivery::{DeliveryStatus, DeliveryTicket, Dispatcher, FeedbackSink, FileFeedbackSink};
pub use engine::{EventOutcome, ReviewEngine, ReviewReport};
pub use errors::RuntimeError;
pub use prompts::{PromptMode, SystemPrompts};
pub use registry::{QueuePosition, SessionRegistry, SessionSlot, SessionSnapshot, SessionStats};
pub use triage::{Decision, TriagePolicy};
