//! Error types for the tiller-store crate.

/// Errors that can occur reading or writing task records.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Task not found
    #[error("Task not found: {0}")]
    NotFound(String),

    /// A record on disk does not match the expected format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
