//! Bash tool: shell command execution.

use crate::error::ToolError;
use crate::shell::run_shell;
use crate::traits::{schema_value, Tool, ToolContext, ToolResult};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MAX_OUTPUT_BYTES: usize = 50 * 1024;

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct BashParams {
    /// Shell command to execute.
    pub command: String,
    /// Optional timeout in seconds. Defaults to the configured tool timeout.
    #[serde(default)]
    pub timeout: Option<u64>,
}

pub struct BashTool;

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }
    fn label(&self) -> &str {
        "Bash"
    }
    fn description(&self) -> &str {
        "Execute a shell command in the working directory. Returns stdout, then \
         stderr, with the exit code on failure."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        schema_value::<BashParams>()
    }

    // The per-call `timeout` parameter may exceed the default.
    fn call_timeout(&self, _default: Duration) -> Option<Duration> {
        None
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let params: BashParams = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidParameters(e.to_string()))?;

        let timeout = params
            .timeout
            .map(Duration::from_secs)
            .unwrap_or(ctx.timeout);

        let output = run_shell(&params.command, &ctx.working_dir, timeout, &ctx.cancel).await?;

        let mut text = combine_streams(
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        );
        let exit_code = output.exit_code;
        if !output.success {
            text = format!("Exit code: {exit_code}\n{text}");
        }

        Ok(ToolResult {
            output: text,
            metadata: serde_json::json!({"exit_code": exit_code}),
            is_error: !output.success,
        })
    }
}

/// Stdout, then stderr under a marker, clipped to the output cap.
fn combine_streams(stdout: &str, stderr: &str) -> String {
    let text = match (stdout.is_empty(), stderr.is_empty()) {
        (true, true) => return "(no output)".to_string(),
        (false, true) => stdout.to_string(),
        (true, false) => format!("STDERR:\n{stderr}"),
        (false, false) => format!("{stdout}\nSTDERR:\n{stderr}"),
    };
    clip_middle(text, MAX_OUTPUT_BYTES)
}

/// Keep the head and tail of oversized output. Errors tend to show up at
/// the end, setup noise at the start.
fn clip_middle(text: String, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text;
    }
    let mut head = max_bytes / 2;
    while !text.is_char_boundary(head) {
        head -= 1;
    }
    let mut tail = text.len() - max_bytes / 2;
    while !text.is_char_boundary(tail) {
        tail += 1;
    }
    format!(
        "{}\n\n... ({} bytes omitted) ...\n\n{}",
        &text[..head],
        tail - head,
        &text[tail..]
    )
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_ctx(dir: &TempDir) -> ToolContext {
        ToolContext {
            working_dir: dir.path().to_path_buf(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_bash_echo() {
        let dir = TempDir::new().unwrap();
        let result = BashTool
            .execute(serde_json::json!({"command": "echo hello"}), &test_ctx(&dir))
            .await
            .unwrap();

        assert!(!result.is_error);
        assert!(result.output.contains("hello"));
    }

    #[tokio::test]
    async fn test_bash_runs_in_working_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let result = BashTool
            .execute(serde_json::json!({"command": "ls"}), &test_ctx(&dir))
            .await
            .unwrap();

        assert!(result.output.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_bash_exit_code() {
        let dir = TempDir::new().unwrap();
        let result = BashTool
            .execute(serde_json::json!({"command": "exit 42"}), &test_ctx(&dir))
            .await
            .unwrap();

        assert!(result.is_error);
        assert!(result.output.contains("42"));
        assert_eq!(result.metadata["exit_code"], 42);
    }

    #[tokio::test]
    async fn test_bash_timeout() {
        let dir = TempDir::new().unwrap();
        let result = BashTool
            .execute(
                serde_json::json!({"command": "sleep 30", "timeout": 1}),
                &test_ctx(&dir),
            )
            .await;

        match result.unwrap_err() {
            ToolError::Timeout(_) => {}
            other => panic!("Expected Timeout, got: {other:?}"),
        }
    }

    #[test]
    fn test_clip_middle_keeps_both_ends() {
        let text = format!("{}{}", "a".repeat(100), "z".repeat(100));
        let clipped = clip_middle(text, 40);
        assert!(clipped.starts_with(&"a".repeat(20)));
        assert!(clipped.ends_with(&"z".repeat(20)));
        assert!(clipped.contains("160 bytes omitted"));
    }

    #[test]
    fn test_combine_streams() {
        assert_eq!(combine_streams("", ""), "(no output)");
        assert_eq!(combine_streams("out\n", "err\n"), "out\n\nSTDERR:\nerr\n");
    }
}
