//! Tool trait definition and common types.

use crate::error::ToolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Context provided to tools during execution.
#[derive(Clone)]
pub struct ToolContext {
    /// Current working directory.
    pub working_dir: PathBuf,
    /// Identifier of the run the call belongs to.
    pub session_id: String,
    /// Per-call execution timeout.
    pub timeout: Duration,
    /// Cancelled when the owning run is cancelled.
    pub cancel: CancellationToken,
    /// Delegation seam used by the `task` tool.
    pub task_runner: Option<Arc<dyn TaskRunner>>,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            working_dir: std::env::current_dir().unwrap_or_default(),
            session_id: String::new(),
            timeout: Duration::from_secs(120),
            cancel: CancellationToken::new(),
            task_runner: None,
        }
    }
}

impl fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolContext")
            .field("working_dir", &self.working_dir)
            .field("session_id", &self.session_id)
            .field("timeout", &self.timeout)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("task_runner", &self.task_runner.is_some())
            .finish()
    }
}

/// A delegated unit of work requested through the `task` tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskRequest {
    /// Agent profile to run.
    pub agent: String,
    /// Prompt seeding the child conversation.
    pub prompt: String,
    /// Short human-readable label.
    pub description: Option<String>,
    pub max_turns: Option<usize>,
    pub model: Option<String>,
    /// Start a detached background task instead of waiting for the result.
    pub background: bool,
}

/// Outcome of a [`TaskRequest`].
#[derive(Debug, Clone, Default)]
pub struct TaskExecution {
    pub agent: String,
    pub success: bool,
    /// Final assistant text of the child run.
    pub content: String,
    pub error: Option<String>,
    pub turns: usize,
    /// Set when the request was started in the background.
    pub background_task_id: Option<String>,
}

/// Runs delegated tasks on behalf of the `task` tool.
///
/// Implemented by the engine; the tools crate only knows this seam.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run_task(
        &self,
        request: TaskRequest,
        cancel: CancellationToken,
    ) -> Result<TaskExecution, ToolError>;
}

/// Result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Output text.
    pub output: String,
    /// Optional metadata (e.g., line count, file size).
    pub metadata: serde_json::Value,
    /// Whether the result represents an error.
    pub is_error: bool,
}

impl ToolResult {
    /// Create a successful tool result.
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            metadata: serde_json::Value::Null,
            is_error: false,
        }
    }

    /// Create a successful result with metadata.
    pub fn success_with_metadata(output: impl Into<String>, metadata: serde_json::Value) -> Self {
        Self {
            output: output.into(),
            metadata,
            is_error: false,
        }
    }

    /// Create an error tool result.
    pub fn error(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            metadata: serde_json::Value::Null,
            is_error: true,
        }
    }
}

/// Trait that all tools must implement.
///
/// Tools are the primary way the agent interacts with the environment.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Machine-readable tool name (e.g., "read").
    fn name(&self) -> &str;

    /// Human-readable label (e.g., "Read File").
    fn label(&self) -> &str;

    /// Description of what the tool does.
    fn description(&self) -> &str;

    /// JSON Schema describing the tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Whether calls may overlap with other concurrency-safe calls.
    ///
    /// Tools with side effects keep the default and run alone.
    fn is_concurrency_safe(&self) -> bool {
        false
    }

    /// Deadline the registry applies to one call, given the configured
    /// default. `None` means the tool enforces its own.
    fn call_timeout(&self, default: Duration) -> Option<Duration> {
        Some(default)
    }

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError>;
}

// Compile-time check: Tool must be object-safe
const _: () = {
    fn _assert_object_safe(_: &dyn Tool, _: &dyn TaskRunner) {}
};

/// JSON schema of a parameter struct, as a plain value.
pub(crate) fn schema_value<T: schemars::JsonSchema>() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or(serde_json::Value::Null)
}
