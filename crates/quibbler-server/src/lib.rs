//! # quibbler-server
//!
//! Transport adapters around the review engine.
//!
//! - HTTP hook server (axum): `/hook/{session_id}`, `/health`, `/metrics`,
//!   `/rules/invalidate`
//! - Stdio tool server: newline-delimited JSON-RPC exposing `review_code`
//! - Prometheus recorder installation
//! - Graceful shutdown via `tokio::signal` + `CancellationToken`

#![deny(unsafe_code)]

pub mod errors;
pub mod health;
pub mod metrics;
pub mod rpc;
pub mod server;
pub mod shutdown;
pub mod stdio;

#[cfg(test)]
mod test_support;

pub use errors::ServerError;
pub use server::{AppState, QuibblerServer};
pub use shutdown::ShutdownCoordinator;
pub use stdio::ToolServer;
