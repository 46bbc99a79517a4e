//! Read tool: line-numbered file contents, one window at a time.

use crate::error::ToolError;
use crate::path_guard::resolve_existing_path;
use crate::traits::{schema_value, Tool, ToolContext, ToolResult};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

const DEFAULT_MAX_LINES: usize = 2000;
/// Longer lines are cut so one minified file cannot flood the context.
const MAX_LINE_CHARS: usize = 2000;
const MAX_OUTPUT_BYTES: usize = 50 * 1024;
/// Bytes inspected for a NUL when deciding whether a file is binary.
const BINARY_SNIFF_BYTES: usize = 8 * 1024;

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ReadParams {
    /// File path to read (relative to working directory).
    pub path: String,
    /// First line to show, 1-based. Default: 1.
    #[serde(default)]
    pub start_line: Option<usize>,
    /// Maximum number of lines to show. Default: 2000.
    #[serde(default)]
    pub max_lines: Option<usize>,
}

/// The slice of a file chosen for output.
#[derive(Debug, PartialEq)]
struct Window {
    text: String,
    first: usize,
    last: usize,
    total: usize,
    truncated_bytes: bool,
}

/// Number lines `first..` like `cat -n`, stopping at `max_lines` lines or
/// the output byte cap, whichever comes first.
fn number_lines(content: &str, first: usize, max_lines: usize) -> Window {
    let total = content.lines().count();
    let mut text = String::new();
    let mut last = first.saturating_sub(1);
    let mut truncated_bytes = false;

    for (idx, line) in content.lines().enumerate().skip(first - 1).take(max_lines) {
        let line = match line.char_indices().nth(MAX_LINE_CHARS) {
            Some((cut, _)) => format!("{}...", &line[..cut]),
            None => line.to_string(),
        };
        let numbered = format!("{:>6}\t{line}\n", idx + 1);
        if text.len() + numbered.len() > MAX_OUTPUT_BYTES {
            truncated_bytes = true;
            break;
        }
        text.push_str(&numbered);
        last = idx + 1;
    }

    Window {
        text,
        first,
        last,
        total,
        truncated_bytes,
    }
}

pub struct ReadTool;

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }
    fn label(&self) -> &str {
        "Read File"
    }
    fn description(&self) -> &str {
        "Read a text file with line numbers. Use start_line and max_lines to page \
         through large files."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        schema_value::<ReadParams>()
    }
    fn is_concurrency_safe(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let params: ReadParams = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidParameters(e.to_string()))?;
        let first = params.start_line.unwrap_or(1).max(1);
        let max_lines = params.max_lines.unwrap_or(DEFAULT_MAX_LINES).max(1);

        let path = resolve_existing_path(Path::new(&params.path), &ctx.working_dir)?;
        if path.is_dir() {
            return Err(ToolError::InvalidParameters(format!(
                "{} is a directory; use glob to list files",
                params.path
            )));
        }

        let bytes = tokio::fs::read(&path).await?;
        if bytes.iter().take(BINARY_SNIFF_BYTES).any(|b| *b == 0) {
            return Ok(ToolResult::error(format!(
                "{} looks like a binary file ({} bytes); not shown",
                params.path,
                bytes.len()
            )));
        }
        let content = String::from_utf8_lossy(&bytes);

        let window = number_lines(&content, first, max_lines);
        if window.total > 0 && first > window.total {
            return Ok(ToolResult::error(format!(
                "start_line {first} is past the end of {} ({} lines)",
                params.path, window.total
            )));
        }

        let mut output = window.text.trim_end_matches('\n').to_string();
        if output.is_empty() {
            output = "(empty file)".to_string();
        } else if window.last < window.total {
            let reason = if window.truncated_bytes {
                "output size limit reached"
            } else {
                "line limit reached"
            };
            output.push_str(&format!(
                "\n\n(showing lines {}-{} of {}; {reason}, continue with start_line {})",
                window.first,
                window.last,
                window.total,
                window.last + 1
            ));
        }

        Ok(ToolResult::success_with_metadata(
            output,
            serde_json::json!({
                "total_lines": window.total,
                "start_line": window.first,
                "end_line": window.last,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn test_ctx(dir: &TempDir) -> ToolContext {
        ToolContext {
            working_dir: dir.path().to_path_buf(),
            ..Default::default()
        }
    }

    async fn read(dir: &TempDir, args: serde_json::Value) -> Result<ToolResult, ToolError> {
        ReadTool.execute(args, &test_ctx(dir)).await
    }

    #[tokio::test]
    async fn test_read_file_numbered() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("test.txt"), "line1\nline2\n").unwrap();

        let result = read(&dir, serde_json::json!({"path": "test.txt"})).await.unwrap();

        assert!(!result.is_error);
        assert_eq!(result.output, "     1\tline1\n     2\tline2");
        assert_eq!(result.metadata["end_line"], 2);
    }

    #[tokio::test]
    async fn test_read_window() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("test.txt"), "a\nb\nc\nd\ne\n").unwrap();

        let result = read(
            &dir,
            serde_json::json!({"path": "test.txt", "start_line": 3, "max_lines": 2}),
        )
        .await
        .unwrap();

        assert!(result.output.starts_with("     3\tc\n     4\td"));
        assert!(result.output.contains("showing lines 3-4 of 5"));
        assert!(result.output.contains("continue with start_line 5"));
    }

    #[tokio::test]
    async fn test_read_past_end_is_error_result() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("short.txt"), "only\n").unwrap();

        let result = read(&dir, serde_json::json!({"path": "short.txt", "start_line": 10}))
            .await
            .unwrap();

        assert!(result.is_error);
        assert!(result.output.contains("past the end"));
    }

    #[tokio::test]
    async fn test_read_binary_refused() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("blob.bin"), [0x7f, b'E', b'L', b'F', 0, 1, 2]).unwrap();

        let result = read(&dir, serde_json::json!({"path": "blob.bin"})).await.unwrap();
        assert!(result.is_error);
        assert!(result.output.contains("binary"));
    }

    #[tokio::test]
    async fn test_read_empty_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("empty.txt"), "").unwrap();

        let result = read(&dir, serde_json::json!({"path": "empty.txt"})).await.unwrap();
        assert_eq!(result.output, "(empty file)");
    }

    #[tokio::test]
    async fn test_read_nonexistent() {
        let dir = TempDir::new().unwrap();
        assert!(read(&dir, serde_json::json!({"path": "nope.txt"})).await.is_err());
    }

    #[tokio::test]
    async fn test_path_traversal_blocked() {
        let dir = TempDir::new().unwrap();
        let result = read(&dir, serde_json::json!({"path": "../../../etc/passwd"})).await;

        match result.unwrap_err() {
            ToolError::PermissionDenied(_) | ToolError::ExecutionError(_) => {}
            other => panic!("Expected PermissionDenied, got: {other:?}"),
        }
    }

    #[test]
    fn test_long_lines_cut() {
        let line = "x".repeat(MAX_LINE_CHARS + 10);
        let window = number_lines(&line, 1, 10);
        assert!(window.text.ends_with("...\n"));
        assert_eq!(window.last, 1);
    }
}
