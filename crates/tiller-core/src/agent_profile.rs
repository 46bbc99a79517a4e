//! Agent profile metadata.

use serde::Serialize;

/// Runtime classification for an agent profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    /// Selected directly by the user.
    Primary,
    /// Invoked through the `task` tool or as a background job.
    Subagent,
}

/// Agent profile: prompt plus the tools the agent may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AgentProfile {
    /// Stable machine-readable name.
    pub name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub mode: AgentMode,
    pub system_prompt: &'static str,
    /// Tool allow-list. `None` grants every registered tool.
    pub tools: Option<&'static [&'static str]>,
}

impl AgentProfile {
    pub fn is_primary(self) -> bool {
        self.mode == AgentMode::Primary
    }

    pub fn is_subagent(self) -> bool {
        self.mode == AgentMode::Subagent
    }

    pub fn allows_tool(self, tool: &str) -> bool {
        match self.tools {
            Some(tools) => tools.iter().any(|name| *name == tool),
            None => true,
        }
    }
}
