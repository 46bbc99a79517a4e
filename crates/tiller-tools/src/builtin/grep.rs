//! Grep tool: regex content search across the workspace.
//!
//! Output follows the ripgrep convention: `path:line:text` for matching
//! lines and `path-line-text` for context lines, with `--` between
//! non-adjacent blocks.

use crate::error::ToolError;
use crate::path_guard::{resolve_existing_path, workspace_root};
use crate::traits::{schema_value, Tool, ToolContext, ToolResult};
use async_trait::async_trait;
use ignore::WalkBuilder;
use regex::{Regex, RegexBuilder};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

const DEFAULT_MAX_LINES: usize = 200;

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct GrepParams {
    /// Regex pattern to search for.
    pub pattern: String,
    /// File or directory to search, relative to the working directory.
    #[serde(default)]
    pub path: Option<String>,
    /// Only search files whose name or relative path matches this glob (e.g. `*.rs`).
    #[serde(default)]
    pub include: Option<String>,
    /// Lines of context to show around each match.
    #[serde(default)]
    pub context: usize,
    /// Match without regard to case.
    #[serde(default)]
    pub ignore_case: bool,
    /// Stop after this many output lines. Default: 200.
    #[serde(default)]
    pub max_lines: Option<usize>,
}

/// Everything one search needs, moved onto the blocking pool.
struct Search {
    root: PathBuf,
    base: PathBuf,
    regex: Regex,
    include: Option<glob::Pattern>,
    context: usize,
    max_lines: usize,
}

#[derive(Debug, Default)]
struct SearchOutput {
    lines: Vec<String>,
    matches: usize,
    files: usize,
    truncated: bool,
}

impl Search {
    fn run(&self, cancel: &CancellationToken) -> Result<SearchOutput, ToolError> {
        let mut out = SearchOutput::default();
        let walker = WalkBuilder::new(&self.base).git_ignore(true).hidden(false).build();

        for entry in walker.flatten() {
            if cancel.is_cancelled() {
                return Err(ToolError::Cancelled);
            }
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            if !self.included(rel) {
                continue;
            }
            // Unreadable or non-UTF-8 files are skipped.
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                continue;
            };

            let found = self.search_text(&rel.to_string_lossy(), &content, &mut out);
            if found > 0 {
                out.files += 1;
                out.matches += found;
            }
            if out.truncated {
                break;
            }
        }
        Ok(out)
    }

    fn included(&self, rel: &Path) -> bool {
        let Some(pattern) = &self.include else {
            return true;
        };
        let name_matches = rel
            .file_name()
            .is_some_and(|name| pattern.matches(&name.to_string_lossy()));
        name_matches || pattern.matches_path(rel)
    }

    /// Append one file's blocks to `out`; returns the number of matching lines.
    fn search_text(&self, rel: &str, content: &str, out: &mut SearchOutput) -> usize {
        let lines: Vec<&str> = content.lines().collect();
        let hits: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| self.regex.is_match(line))
            .map(|(i, _)| i)
            .collect();

        for (start, end) in context_blocks(&hits, self.context, lines.len()) {
            // Blocks never touch, so every new one after the first is a gap.
            if self.context > 0 && !out.lines.is_empty() {
                out.lines.push("--".to_string());
            }
            for (i, line) in lines.iter().enumerate().take(end).skip(start) {
                if out.lines.len() >= self.max_lines {
                    out.truncated = true;
                    return hits.len();
                }
                let sep = if hits.binary_search(&i).is_ok() { ':' } else { '-' };
                out.lines.push(format!("{rel}{sep}{}{sep}{line}", i + 1));
            }
        }
        hits.len()
    }
}

/// Half-open line ranges covering each hit plus `context` lines either
/// side, with overlapping or touching ranges joined.
fn context_blocks(hits: &[usize], context: usize, total: usize) -> Vec<(usize, usize)> {
    let mut blocks: Vec<(usize, usize)> = Vec::new();
    for &hit in hits {
        let start = hit.saturating_sub(context);
        let end = (hit + context + 1).min(total);
        match blocks.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => blocks.push((start, end)),
        }
    }
    blocks
}

pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }
    fn label(&self) -> &str {
        "Grep"
    }
    fn description(&self) -> &str {
        "Search file contents with a regex. Respects .gitignore; supports a file \
         filter, context lines and case-insensitive matching."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        schema_value::<GrepParams>()
    }
    fn is_concurrency_safe(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let params: GrepParams = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidParameters(e.to_string()))?;

        let regex = RegexBuilder::new(&params.pattern)
            .case_insensitive(params.ignore_case)
            .build()
            .map_err(|e| ToolError::InvalidParameters(format!("Invalid regex: {e}")))?;
        let include = params
            .include
            .as_deref()
            .map(glob::Pattern::new)
            .transpose()
            .map_err(|e| ToolError::InvalidParameters(format!("Invalid include pattern: {e}")))?;

        let root = workspace_root(&ctx.working_dir)?;
        let base = match params.path.as_deref() {
            Some(path) => resolve_existing_path(Path::new(path), &ctx.working_dir)?,
            None => root.clone(),
        };

        let search = Search {
            root,
            base,
            regex,
            include,
            context: params.context,
            max_lines: params.max_lines.unwrap_or(DEFAULT_MAX_LINES).max(1),
        };
        let cancel = ctx.cancel.clone();
        let out = tokio::task::spawn_blocking(move || search.run(&cancel))
            .await
            .map_err(|e| ToolError::ExecutionError(format!("search task failed: {e}")))??;

        let mut output = if out.lines.is_empty() {
            "(no matches)".to_string()
        } else {
            out.lines.join("\n")
        };
        if out.truncated {
            output.push_str(&format!(
                "\n\n... (output truncated at {} lines; narrow the pattern or path)",
                out.lines.len()
            ));
        }

        Ok(ToolResult::success_with_metadata(
            output,
            serde_json::json!({
                "matches": out.matches,
                "files": out.files,
                "truncated": out.truncated,
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

    async fn grep(dir: &TempDir, args: serde_json::Value) -> ToolResult {
        GrepTool.execute(args, &test_ctx(dir)).await.unwrap()
    }

    #[tokio::test]
    async fn test_grep_basic() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("f.rs"), "fn main() {}\nfn helper() {}\nlet x = 1;\n").unwrap();

        let result = grep(&dir, serde_json::json!({"pattern": "fn \\w+"})).await;

        assert_eq!(result.output, "f.rs:1:fn main() {}\nf.rs:2:fn helper() {}");
        assert_eq!(result.metadata["matches"], 2);
        assert_eq!(result.metadata["files"], 1);
    }

    #[tokio::test]
    async fn test_grep_include_filter() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.rs"), "hello rust\n").unwrap();
        fs::write(dir.path().join("b.txt"), "hello text\n").unwrap();

        let result = grep(&dir, serde_json::json!({"pattern": "hello", "include": "*.rs"})).await;

        assert!(result.output.contains("a.rs"));
        assert!(!result.output.contains("b.txt"));
    }

    #[tokio::test]
    async fn test_grep_context_marks_lines() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("f.txt"), "a\nhit1\nb\nhit2\nc\nd\ne\nf\nhit3\n").unwrap();

        let result = grep(&dir, serde_json::json!({"pattern": "hit", "context": 1})).await;

        let lines: Vec<&str> = result.output.lines().collect();
        assert_eq!(
            lines,
            vec![
                "f.txt-1-a",
                "f.txt:2:hit1",
                "f.txt-3-b",
                "f.txt:4:hit2",
                "f.txt-5-c",
                "--",
                "f.txt-8-f",
                "f.txt:9:hit3",
            ]
        );
    }

    #[tokio::test]
    async fn test_grep_ignore_case() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("f.txt"), "TODO later\n").unwrap();

        let strict = grep(&dir, serde_json::json!({"pattern": "todo"})).await;
        assert_eq!(strict.output, "(no matches)");

        let loose = grep(&dir, serde_json::json!({"pattern": "todo", "ignore_case": true})).await;
        assert_eq!(loose.output, "f.txt:1:TODO later");
    }

    #[tokio::test]
    async fn test_grep_truncates() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("f.txt"), "x\n".repeat(10)).unwrap();

        let result = grep(&dir, serde_json::json!({"pattern": "x", "max_lines": 3})).await;

        assert!(result.output.contains("truncated at 3 lines"));
        assert_eq!(result.metadata["truncated"], true);
    }

    #[tokio::test]
    async fn test_grep_cancelled() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("f.txt"), "x\n").unwrap();
        let ctx = test_ctx(&dir);
        ctx.cancel.cancel();

        let result = GrepTool.execute(serde_json::json!({"pattern": "x"}), &ctx).await;
        assert!(matches!(result, Err(ToolError::Cancelled)));
    }

    #[test]
    fn test_context_blocks() {
        assert!(context_blocks(&[], 2, 10).is_empty());
        assert_eq!(context_blocks(&[0, 3], 1, 10), vec![(0, 5)]);
        assert_eq!(context_blocks(&[0, 6], 1, 7), vec![(0, 2), (5, 7)]);
    }
}
