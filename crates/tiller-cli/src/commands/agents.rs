use tiller_core::{AgentMode, AgentProfile, AgentRegistry};

pub fn run() {
    let profiles = AgentRegistry::builtins();
    println!("Agents ({}):", profiles.len());
    for profile in profiles {
        println!(
            "{} [{}] - {} (tools: {})",
            profile.name,
            mode_label(profile.mode),
            profile.description,
            tool_list(profile)
        );
    }
}

fn mode_label(mode: AgentMode) -> &'static str {
    match mode {
        AgentMode::Primary => "primary",
        AgentMode::Subagent => "subagent",
    }
}

fn tool_list(profile: &AgentProfile) -> String {
    match profile.tools {
        Some(tools) => tools.join(", "),
        None => "all".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_list() {
        let explore = AgentRegistry::get("explore").unwrap();
        assert_eq!(tool_list(&explore), "read, glob, grep");
        assert_eq!(tool_list(&AgentRegistry::default_agent()), "all");
    }
}
