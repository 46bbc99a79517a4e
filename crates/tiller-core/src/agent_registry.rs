//! Built-in agent registry.

use crate::agent_profile::{AgentMode, AgentProfile};
use crate::error::TillerError;

const READ_TOOLS: &[&str] = &["read", "glob", "grep"];
const REVIEW_TOOLS: &[&str] = &["read", "glob", "grep", "bash"];
const GENERAL_TOOLS: &[&str] = &["read", "glob", "grep", "bash", "task"];

const BUILTIN_AGENTS: &[AgentProfile] = &[
    AgentProfile {
        name: "default",
        display_name: "Default",
        description: "General-purpose coding assistant.",
        mode: AgentMode::Primary,
        system_prompt: "You are tiller, an AI coding assistant working in the user's repository. \
Use the available tools to inspect the code before answering. Be concise and direct.",
        tools: None,
    },
    AgentProfile {
        name: "plan",
        display_name: "Plan",
        description: "Decompose work into steps without changing anything.",
        mode: AgentMode::Primary,
        system_prompt: "You are tiller in planning mode. Read the relevant code, then break the \
problem into concrete steps and call out risks. Do not modify files.",
        tools: Some(READ_TOOLS),
    },
    AgentProfile {
        name: "explore",
        display_name: "Explore",
        description: "Investigate codepaths quickly and return findings with evidence.",
        mode: AgentMode::Subagent,
        system_prompt: "You are tiller in explore mode. Gather relevant code context quickly, \
cite file paths and line numbers, and avoid speculative conclusions.",
        tools: Some(READ_TOOLS),
    },
    AgentProfile {
        name: "review",
        display_name: "Review",
        description: "Review changes for bugs, regressions, and missing tests.",
        mode: AgentMode::Subagent,
        system_prompt: "You are tiller in review mode. Look for defects, behavioral regressions \
and missing tests. Report findings, not summaries.",
        tools: Some(REVIEW_TOOLS),
    },
    AgentProfile {
        name: "general",
        display_name: "General",
        description: "Carry out a self-contained task, delegating further if needed.",
        mode: AgentMode::Subagent,
        system_prompt: "You are a tiller subagent. Complete the delegated task on your own and \
finish with a short report of what you found or did.",
        tools: Some(GENERAL_TOOLS),
    },
];

/// Registry over built-in agent profiles.
pub struct AgentRegistry;

impl AgentRegistry {
    pub fn builtins() -> &'static [AgentProfile] {
        BUILTIN_AGENTS
    }

    pub fn default_agent() -> AgentProfile {
        BUILTIN_AGENTS[0]
    }

    /// Named profile, matched case-insensitively.
    pub fn get(name: &str) -> Option<AgentProfile> {
        BUILTIN_AGENTS
            .iter()
            .copied()
            .find(|profile| profile.name.eq_ignore_ascii_case(name))
    }

    /// Resolve an optional agent name into a concrete profile.
    pub fn resolve(name: Option<&str>) -> Result<AgentProfile, TillerError> {
        match name {
            Some(name) => Self::get(name).ok_or_else(|| unknown_agent(name)),
            None => Ok(Self::default_agent()),
        }
    }

    pub fn primary_agents() -> Vec<AgentProfile> {
        BUILTIN_AGENTS
            .iter()
            .copied()
            .filter(|profile| profile.is_primary())
            .collect()
    }

    pub fn subagents() -> Vec<AgentProfile> {
        BUILTIN_AGENTS
            .iter()
            .copied()
            .filter(|profile| profile.is_subagent())
            .collect()
    }
}

pub(crate) fn unknown_agent(requested: &str) -> TillerError {
    TillerError::UnknownAgent {
        requested: requested.to_string(),
        available: BUILTIN_AGENTS
            .iter()
            .map(|profile| profile.name)
            .collect::<Vec<_>>()
            .join(", "),
    }
}

#[cfg(test)]
mod tests {
    use super::AgentRegistry;
    use crate::agent_profile::AgentMode;

    #[test]
    fn test_default_agent_is_available() {
        let agent = AgentRegistry::default_agent();
        assert_eq!(agent.name, "default");
        assert_eq!(agent.mode, AgentMode::Primary);
        assert!(agent.allows_tool("bash"));
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        assert_eq!(AgentRegistry::resolve(Some("Explore")).unwrap().name, "explore");
    }

    #[test]
    fn test_subagent_allow_lists() {
        let explore = AgentRegistry::get("explore").unwrap();
        assert!(explore.allows_tool("grep"));
        assert!(!explore.allows_tool("bash"));
        assert!(!explore.allows_tool("task"));
        assert!(AgentRegistry::get("general").unwrap().allows_tool("task"));

        let names: Vec<_> = AgentRegistry::subagents().iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["explore", "review", "general"]);
    }

    #[test]
    fn test_unknown_agent_error_lists_available() {
        let error = AgentRegistry::resolve(Some("missing")).unwrap_err().to_string();
        assert!(error.contains("Unknown agent 'missing'"));
        assert!(error.contains("default"));
        assert!(error.contains("review"));
    }
}
