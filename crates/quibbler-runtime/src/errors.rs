//! Runtime error types.

use std::path::PathBuf;

use quibbler_llm::ProviderError;

/// Errors surfaced for a single event. None of them is fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The reviewing model could not be reached or rejected the request.
    #[error("Model invocation failed: {0}")]
    ModelInvocation(#[from] ProviderError),

    /// The feedback file could not be written.
    #[error("Failed to write feedback to {}: {source}", path.display())]
    FeedbackWrite {
        /// Destination path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The engine stopped accepting reviews.
    #[error("Review engine is shutting down")]
    Shutdown,
}

impl RuntimeError {
    /// Whether retrying the same event could succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ModelInvocation(e) => e.is_retryable(),
            Self::FeedbackWrite { .. } => true,
            Self::Shutdown => false,
        }
    }

    /// Error category string for logs and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::ModelInvocation(_) => "model_invocation",
            Self::FeedbackWrite { .. } => "feedback_write",
            Self::Shutdown => "shutdown",
        }
    }
}
