//! Error types for the tiller-core crate.
//!
//! `Agent::run` itself never fails: these errors surface inside results or
//! are recovered locally by the loop.

use tiller_provider::ProviderError;
use tiller_store::StoreError;

/// Core error type for the tiller engine.
#[derive(Debug, thiserror::Error)]
pub enum TillerError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown agent '{requested}'. Available agents: {available}")]
    UnknownAgent { requested: String, available: String },

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

/// Failure while collecting one streamed turn.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    /// The provider failed the request or emitted an error chunk.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The stream ended without a terminal chunk.
    #[error("stream ended before the turn completed")]
    Truncated,

    #[error("cancelled")]
    Cancelled,
}

/// A compaction cycle that was abandoned. History is left as it was.
#[derive(Debug, thiserror::Error)]
pub enum CompactionError {
    #[error("summarization request failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("summarization returned no text")]
    EmptySummary,
}
