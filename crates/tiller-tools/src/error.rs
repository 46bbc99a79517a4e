//! Error types for the tiller-tools crate.

/// Errors that can occur during tool execution.
///
/// The registry folds every variant into an error [`ToolResult`](crate::ToolResult);
/// none of them aborts a run.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Invalid parameters passed to tool
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Tool execution failed
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// Operation not allowed, e.g. a path outside the workspace
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Operation timed out
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Execution was cancelled
    #[error("Cancelled")]
    Cancelled,

    /// I/O error during tool execution
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
