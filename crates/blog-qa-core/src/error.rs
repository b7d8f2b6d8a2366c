//! Request-level error taxonomy for the ask pipeline.
//!
//! Storage and provider code returns `anyhow::Result`; the ask pipeline
//! classifies those failures into an [`AskError`] so callers can decide
//! between rejecting a request, retrying, or ending a stream early.
//! An empty retrieval is not an error and never appears here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AskError {
    /// Malformed input, rejected before any event is emitted.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Store or query fault while fetching candidates.
    #[error("retrieval failed: {0:#}")]
    Retrieval(anyhow::Error),

    /// Embedding or chat-model provider fault.
    #[error("provider failed: {0:#}")]
    Provider(anyhow::Error),
}

impl AskError {
    pub fn validation(message: impl Into<String>) -> Self {
        AskError::Validation(message.into())
    }

    /// Short machine-readable code used in logs and HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AskError::Validation(_) => "bad_request",
            AskError::Retrieval(_) => "retrieval_error",
            AskError::Provider(_) => "provider_error",
        }
    }
}
