//! # quibbler-core
//!
//! Foundation types shared by every Quibbler crate:
//!
//! - **Events**: [`InboundEvent`] and the [`EventType`] vocabulary of agent hooks
//! - **Turns**: [`Turn`] / [`Role`] records and the [`Materialized`] context view
//! - **Verdicts**: [`Verdict`] and [`ReviewReply`], the outcome of one review
//! - **Paths**: `~/.quibbler` and `<project>/.quibbler` layout helpers
//! - **Logging**: [`logging::init_subscriber`] for `tracing` setup

#![deny(unsafe_code)]

pub mod events;
pub mod logging;
pub mod paths;
pub mod turns;
pub mod verdict;

pub use events::{EventType, InboundEvent};
pub use turns::{Materialized, Role, Turn};
pub use verdict::{ReviewReply, Verdict};
