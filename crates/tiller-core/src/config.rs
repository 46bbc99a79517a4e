use crate::permission::{Decision, PermissionPolicy, PermissionRule, PolicyPreset, RuleSet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Serialized settings from ~/.tiller/config.json
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: String,
    pub model: String,
    pub api_keys: HashMap<String, String>,
    pub max_turns: usize,
    pub tool_timeout_secs: u64,
    pub permissions: PermissionSettings,
    pub compaction: CompactionSettings,
    pub subagents: SubagentSettings,
    pub background: BackgroundSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            api_keys: HashMap::new(),
            max_turns: 50,
            tool_timeout_secs: 120,
            permissions: PermissionSettings::default(),
            compaction: CompactionSettings::default(),
            subagents: SubagentSettings::default(),
            background: BackgroundSettings::default(),
        }
    }
}

impl Config {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionSettings {
    pub policy: PolicyPreset,
    pub default: Decision,
    pub rules: Vec<PermissionRule>,
}

impl Default for PermissionSettings {
    fn default() -> Self {
        Self {
            policy: PolicyPreset::Rules,
            default: Decision::Prompt,
            rules: Vec::new(),
        }
    }
}

impl PermissionSettings {
    pub fn to_policy(&self) -> PermissionPolicy {
        self.policy
            .into_policy(RuleSet::new(self.rules.clone(), self.default))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionSettings {
    pub enabled: bool,
    /// Token budget of recent history that is never pruned or summarized.
    pub protect_tokens: usize,
    /// Pruning is skipped unless it would free at least this many tokens.
    pub prune_minimum_tokens: usize,
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            protect_tokens: 40_000,
            prune_minimum_tokens: 20_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubagentSettings {
    /// Nesting limit for subagents started from subagents.
    pub max_depth: usize,
    /// Turn limit when the request does not set one.
    pub max_turns: usize,
}

impl Default for SubagentSettings {
    fn default() -> Self {
        Self {
            max_depth: 2,
            max_turns: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundSettings {
    /// Hard cap on bytes appended to a task's event log.
    pub max_output_bytes: u64,
    pub status_interval_ms: u64,
}

impl Default for BackgroundSettings {
    fn default() -> Self {
        Self {
            max_output_bytes: 10 * 1024 * 1024,
            status_interval_ms: 1_000,
        }
    }
}

impl BackgroundSettings {
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms.max(10))
    }
}

/// Location of the global settings file.
pub struct ConfigStore {
    path: PathBuf,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore {
    pub fn new() -> Self {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".tiller");
        path.push("config.json");
        Self { path }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the saved config, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load(&self) -> Config {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(_) => return Config::default(),
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "ignoring malformed config");
                Config::default()
            }
        }
    }

    pub fn save(&self, config: &Config) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(config)?;
        fs::write(&self.path, content)
    }

    /// Export configured API keys as `<PROVIDER>_API_KEY` unless the
    /// variable is already set.
    pub fn hydrate_env(config: &Config) {
        for (provider, key) in &config.api_keys {
            if key.is_empty() {
                continue;
            }
            let env_var = format!("{}_API_KEY", provider.to_uppercase());
            if std::env::var(&env_var).is_err() {
                std::env::set_var(&env_var, key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::RuleAction;
    use tempfile::TempDir;

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: Config = serde_json::from_str(
            r#"{"provider":"ollama","permissions":{"rules":[{"tool":"bash","action":"allow","pattern":"git:*"}]}}"#,
        )
        .unwrap();
        assert_eq!(parsed.provider, "ollama");
        assert_eq!(parsed.max_turns, 50);
        assert_eq!(parsed.permissions.policy, PolicyPreset::Rules);
        assert_eq!(parsed.permissions.default, Decision::Prompt);
        assert_eq!(parsed.permissions.rules[0].action, RuleAction::Allow);
        assert!(parsed.compaction.enabled);
        assert_eq!(parsed.subagents.max_depth, 2);
    }

    #[test]
    fn test_policy_from_settings() {
        let settings = PermissionSettings {
            policy: PolicyPreset::ReadOnly,
            ..Default::default()
        };
        assert_eq!(settings.to_policy(), PermissionPolicy::ReadOnly);

        let settings = PermissionSettings {
            default: Decision::Reject,
            ..Default::default()
        };
        match settings.to_policy() {
            PermissionPolicy::Rules(rules) => assert_eq!(rules.default, Decision::Reject),
            other => panic!("unexpected policy {other:?}"),
        }
    }

    #[test]
    fn test_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::at(dir.path().join("nested/config.json"));
        assert_eq!(store.load().model, "gpt-4o");

        let config = Config {
            model: "glm-5".to_string(),
            max_turns: 7,
            ..Config::default()
        };
        store.save(&config).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.model, "glm-5");
        assert_eq!(loaded.max_turns, 7);
    }

    #[test]
    fn test_malformed_file_falls_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        assert_eq!(ConfigStore::at(path).load().provider, "openai");
    }
}
