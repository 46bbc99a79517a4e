//! Task tool: delegate work to a subagent, in the foreground or background.

use crate::error::ToolError;
use crate::traits::{schema_value, TaskRequest, Tool, ToolContext, ToolResult};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct TaskParams {
    /// Subagent name to invoke.
    pub agent: String,
    /// Prompt for the delegated task.
    pub prompt: String,
    /// Short description of the task (3-5 words).
    #[serde(default)]
    pub description: Option<String>,
    /// Turn limit for the subagent.
    #[serde(default)]
    pub max_turns: Option<usize>,
    /// Model override for the subagent.
    #[serde(default)]
    pub model: Option<String>,
    /// Start the task in the background and return its id immediately.
    #[serde(default)]
    pub background: bool,
}

pub struct TaskTool;

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        "task"
    }

    fn label(&self) -> &str {
        "Task"
    }

    fn description(&self) -> &str {
        "Delegate a focused task to a subagent and return its final response. \
         Set background to true to start it detached and get a task id."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        schema_value::<TaskParams>()
    }

    fn is_concurrency_safe(&self) -> bool {
        true
    }

    // Subagent runs are bounded by their turn limit.
    fn call_timeout(&self, _default: Duration) -> Option<Duration> {
        None
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let params: TaskParams = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidParameters(e.to_string()))?;

        let runner = ctx.task_runner.as_ref().ok_or_else(|| {
            ToolError::ExecutionError("task tool is unavailable in this runtime".to_string())
        })?;

        let request = TaskRequest {
            agent: params.agent,
            prompt: params.prompt,
            description: params.description,
            max_turns: params.max_turns,
            model: params.model,
            background: params.background,
        };
        let execution = runner.run_task(request, ctx.cancel.child_token()).await?;

        if let Some(task_id) = execution.background_task_id {
            return Ok(ToolResult::success_with_metadata(
                format!("Started background task {task_id} ({})", execution.agent),
                serde_json::json!({"agent": execution.agent, "task_id": task_id}),
            ));
        }

        let metadata = serde_json::json!({
            "agent": execution.agent,
            "turns": execution.turns,
        });

        if execution.success {
            return Ok(ToolResult::success_with_metadata(execution.content, metadata));
        }

        let reason = execution
            .error
            .unwrap_or_else(|| "unknown failure".to_string());
        let mut output = format!("Subagent '{}' failed: {reason}", execution.agent);
        if !execution.content.is_empty() {
            output.push_str("\n\nPartial output:\n");
            output.push_str(&execution.content);
        }
        Ok(ToolResult {
            output,
            metadata,
            is_error: true,
        })
    }
}
