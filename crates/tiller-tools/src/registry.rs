//! Tool registry for managing available tools.

use crate::traits::{Tool, ToolContext, ToolResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of available tools.
///
/// Immutable once built and cheap to clone, so agents share one registry and
/// derive restricted views from it.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Check if a tool is registered.
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Registered tools, sorted by name.
    pub fn all(&self) -> Vec<Arc<dyn Tool>> {
        let mut tools: Vec<Arc<dyn Tool>> = self.tools.values().cloned().collect();
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        tools
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// View containing only the allowed tools. Names that are not registered
    /// are ignored.
    pub fn restricted<I, S>(&self, allowed: I) -> ToolRegistry
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tools = allowed
            .into_iter()
            .filter_map(|name| {
                let name = name.as_ref();
                self.tools.get(name).map(|tool| (name.to_string(), tool.clone()))
            })
            .collect();
        Self { tools }
    }

    /// Whether calls to `name` may run concurrently. Unknown tools are not.
    pub fn is_concurrency_safe(&self, name: &str) -> bool {
        self.tools
            .get(name)
            .is_some_and(|tool| tool.is_concurrency_safe())
    }

    /// Execute a tool, folding every failure into an error result.
    ///
    /// The call is bounded by `ctx.timeout` unless the tool enforces its own
    /// deadline.
    pub async fn execute(
        &self,
        name: &str,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> ToolResult {
        let Some(tool) = self.get(name) else {
            return ToolResult::error(format!("Unknown tool: {name}"));
        };

        let outcome = match tool.call_timeout(ctx.timeout) {
            Some(limit) => match tokio::time::timeout(limit, tool.execute(args, ctx)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::debug!(tool = name, ?limit, "tool call timed out");
                    return ToolResult::error(format!(
                        "Tool '{name}' timed out after {:.1}s",
                        limit.as_secs_f64()
                    ));
                }
            },
            None => tool.execute(args, ctx).await,
        };

        outcome.unwrap_or_else(|e| ToolResult::error(e.to_string()))
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
