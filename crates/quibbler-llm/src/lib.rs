//! # quibbler-llm
//!
//! The model invocation port and its default implementation.
//!
//! - [`TextModel`]: plain chat completion (used for reviews and summaries)
//! - [`ReviewModel`]: bounded review request in, [`ReviewReply`] out
//! - [`ChatReviewer`]: adapts any [`TextModel`] into a [`ReviewModel`]
//! - [`ChatClient`]: streaming OpenAI-compatible `/chat/completions` client
//! - [`models`]: per-model context capacity
//!
//! [`ReviewReply`]: quibbler_core::ReviewReply

#![deny(unsafe_code)]

pub mod chat;
pub mod credentials;
pub mod models;
pub mod port;
pub mod provider;
pub mod sse;
pub mod verdict;

pub use chat::{ChatClient, ChatClientConfig};
pub use port::{ChatReviewer, ReviewModel, ReviewRequest};
pub use provider::{ChatMessage, ChatRole, ProviderError, ProviderResult, TextModel};
