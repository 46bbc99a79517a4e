//! Glob tool: file pattern matching with .gitignore awareness.

use crate::error::ToolError;
use crate::path_guard::{resolve_existing_path, workspace_root};
use crate::traits::{schema_value, Tool, ToolContext, ToolResult};
use async_trait::async_trait;
use ignore::WalkBuilder;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

const MAX_RESULTS: usize = 1000;

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct GlobParams {
    /// Glob pattern (e.g. `**/*.rs`, `src/**/*.ts`).
    pub pattern: String,
    /// Directory to search in, relative to the working directory.
    #[serde(default)]
    pub path: Option<String>,
}

pub struct GlobTool;

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }
    fn label(&self) -> &str {
        "Glob"
    }
    fn description(&self) -> &str {
        "Find files matching a glob pattern. Respects .gitignore."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        schema_value::<GlobParams>()
    }
    fn is_concurrency_safe(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let params: GlobParams = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidParameters(e.to_string()))?;

        let glob_pattern = glob::Pattern::new(&params.pattern)
            .map_err(|e| ToolError::InvalidParameters(format!("Invalid glob pattern: {e}")))?;

        let root = workspace_root(&ctx.working_dir)?;
        let base = match params.path.as_deref() {
            Some(path) => resolve_existing_path(Path::new(path), &ctx.working_dir)?,
            None => root.clone(),
        };

        let walker = WalkBuilder::new(&base)
            .git_ignore(true)
            .hidden(false)
            .build();

        let mut matches: Vec<String> = Vec::new();
        let mut truncated = false;
        for entry in walker.flatten() {
            if ctx.cancel.is_cancelled() {
                return Err(ToolError::Cancelled);
            }
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let Ok(rel_to_base) = entry.path().strip_prefix(&base) else {
                continue;
            };
            if !glob_pattern.matches_path(rel_to_base) {
                continue;
            }
            let shown = entry.path().strip_prefix(&root).unwrap_or(rel_to_base);
            matches.push(shown.to_string_lossy().to_string());
            if matches.len() >= MAX_RESULTS {
                truncated = true;
                break;
            }
        }

        matches.sort();

        let count = matches.len();
        let mut output = matches.join("\n");
        if truncated {
            output.push_str(&format!("\n\n... (truncated at {MAX_RESULTS} results)"));
        }

        if output.is_empty() {
            output = "(no matching files)".to_string();
        }

        Ok(ToolResult::success_with_metadata(
            output,
            serde_json::json!({"count": count, "truncated": truncated}),
        ))
    }
}
