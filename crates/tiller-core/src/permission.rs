//! Tool permission policy and per-session approval state.
//!
//! [`PermissionGate::check`] is pure given the policy and the approval cache.
//! Rule-based policies resolve in a fixed order: deny rules, allow rules,
//! session approvals, then the default decision.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

/// Tools whose semantic subject is a shell command.
const SHELL_TOOLS: &[&str] = &["bash"];
/// Tools whose semantic subject is a path or file pattern.
const FILE_TOOLS: &[&str] = &["read", "glob", "grep"];
/// Tools permitted by the read-only preset.
const READ_ONLY_TOOLS: &[&str] = &["read", "glob", "grep"];

/// Outcome of a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Permit,
    Reject,
    /// Ask the confirmation callback.
    Prompt,
}

/// Answer from the confirmation callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    AllowOnce,
    /// Allow now and remember the approval for the rest of the session.
    AllowAlways,
    Deny,
}

/// A call awaiting interactive confirmation.
#[derive(Debug, Clone)]
pub struct ConfirmRequest {
    pub tool: String,
    pub params: serde_json::Value,
    /// What the call would touch: the command line or path, when known.
    pub diff_context: Option<String>,
}

/// Asks the user about a `Prompt` decision.
pub type ConfirmCallback =
    Arc<dyn Fn(ConfirmRequest) -> BoxFuture<'static, ApprovalAction> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Deny,
}

/// One allow or deny rule.
///
/// `pattern` is matched against the call's semantic subject: `*` matches
/// anything, `prefix:*` matches the prefix as a whole word, and anything
/// else is a glob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRule {
    pub tool: String,
    pub action: RuleAction,
    #[serde(default = "default_pattern")]
    pub pattern: String,
}

fn default_pattern() -> String {
    "*".to_string()
}

impl PermissionRule {
    pub fn allow(tool: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            action: RuleAction::Allow,
            pattern: pattern.into(),
        }
    }

    pub fn deny(tool: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            action: RuleAction::Deny,
            pattern: pattern.into(),
        }
    }

    fn matches(&self, tool: &str, subject: &str) -> bool {
        (self.tool == "*" || self.tool.eq_ignore_ascii_case(tool))
            && pattern_matches(&self.pattern, subject)
    }
}

/// Ordered allow/deny rules plus the fallback decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<PermissionRule>,
    #[serde(default = "default_decision")]
    pub default: Decision,
}

fn default_decision() -> Decision {
    Decision::Prompt
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            default: default_decision(),
        }
    }
}

impl RuleSet {
    pub fn new(rules: Vec<PermissionRule>, default: Decision) -> Self {
        Self { rules, default }
    }

    fn find(&self, action: RuleAction, tool: &str, subject: &str) -> bool {
        self.rules
            .iter()
            .any(|rule| rule.action == action && rule.matches(tool, subject))
    }
}

/// Active permission policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionPolicy {
    PermitAll,
    /// Permits the read-only tool set and rejects everything else.
    ReadOnly,
    DenyAll,
    Rules(RuleSet),
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        PermissionPolicy::Rules(RuleSet::default())
    }
}

/// Named policy presets accepted by configuration and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyPreset {
    PermitAll,
    ReadOnly,
    DenyAll,
    #[default]
    Rules,
}

impl PolicyPreset {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyPreset::PermitAll => "permit-all",
            PolicyPreset::ReadOnly => "read-only",
            PolicyPreset::DenyAll => "deny-all",
            PolicyPreset::Rules => "rules",
        }
    }

    /// Build the policy, using `rules` for the rule-based preset.
    pub fn into_policy(self, rules: RuleSet) -> PermissionPolicy {
        match self {
            PolicyPreset::PermitAll => PermissionPolicy::PermitAll,
            PolicyPreset::ReadOnly => PermissionPolicy::ReadOnly,
            PolicyPreset::DenyAll => PermissionPolicy::DenyAll,
            PolicyPreset::Rules => PermissionPolicy::Rules(rules),
        }
    }
}

impl fmt::Display for PolicyPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "permit-all" => Ok(PolicyPreset::PermitAll),
            "read-only" => Ok(PolicyPreset::ReadOnly),
            "deny-all" => Ok(PolicyPreset::DenyAll),
            "rules" => Ok(PolicyPreset::Rules),
            other => Err(format!(
                "unknown permission preset '{other}' (expected permit-all, read-only, deny-all or rules)"
            )),
        }
    }
}

/// Session approvals shared by every agent of a runtime, keyed by tool.
#[derive(Debug, Clone, Default)]
pub struct ApprovalCache {
    inner: Arc<RwLock<HashMap<String, Vec<String>>>>,
}

impl ApprovalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an approved pattern for `tool`.
    pub fn insert(&self, tool: &str, pattern: impl Into<String>) {
        let pattern = pattern.into();
        let mut approvals = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let entry = approvals.entry(tool.to_ascii_lowercase()).or_default();
        if !entry.contains(&pattern) {
            entry.push(pattern);
        }
    }

    pub fn is_approved(&self, tool: &str, subject: &str) -> bool {
        let approvals = self.inner.read().unwrap_or_else(|e| e.into_inner());
        approvals
            .get(&tool.to_ascii_lowercase())
            .is_some_and(|patterns| patterns.iter().any(|p| pattern_matches(p, subject)))
    }

    pub fn clear(&self) {
        self.inner.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        let approvals = self.inner.read().unwrap_or_else(|e| e.into_inner());
        approvals.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decides whether a tool call runs, is rejected, or needs confirmation.
#[derive(Debug, Clone, Default)]
pub struct PermissionGate {
    policy: PermissionPolicy,
    approvals: ApprovalCache,
}

impl PermissionGate {
    pub fn new(policy: PermissionPolicy, approvals: ApprovalCache) -> Self {
        Self { policy, approvals }
    }

    pub fn permit_all() -> Self {
        Self::new(PermissionPolicy::PermitAll, ApprovalCache::new())
    }

    pub fn policy(&self) -> &PermissionPolicy {
        &self.policy
    }

    pub fn approvals(&self) -> &ApprovalCache {
        &self.approvals
    }

    pub fn check(&self, tool: &str, params: &serde_json::Value) -> Decision {
        match &self.policy {
            PermissionPolicy::PermitAll => Decision::Permit,
            PermissionPolicy::DenyAll => Decision::Reject,
            PermissionPolicy::ReadOnly => {
                if is_one_of(tool, READ_ONLY_TOOLS) {
                    Decision::Permit
                } else {
                    Decision::Reject
                }
            }
            PermissionPolicy::Rules(rules) => {
                let subject = semantic_subject(tool, params);
                if rules.find(RuleAction::Deny, tool, &subject) {
                    Decision::Reject
                } else if rules.find(RuleAction::Allow, tool, &subject) {
                    Decision::Permit
                } else if self.approvals.is_approved(tool, &subject) {
                    Decision::Permit
                } else {
                    rules.default
                }
            }
        }
    }

    /// Remember an `AllowAlways` answer. Shell commands are approved by their
    /// first word, file tools by their exact subject.
    pub fn remember(&self, tool: &str, params: &serde_json::Value) {
        let subject = semantic_subject(tool, params);
        let pattern = if is_one_of(tool, SHELL_TOOLS) {
            match subject.split_whitespace().next() {
                Some(word) => format!("{word}:*"),
                None => "*".to_string(),
            }
        } else {
            subject
        };
        tracing::debug!(tool, %pattern, "remembering session approval");
        self.approvals.insert(tool, pattern);
    }
}

fn is_one_of(tool: &str, set: &[&str]) -> bool {
    set.iter().any(|name| name.eq_ignore_ascii_case(tool))
}

/// The part of the parameters rules are matched against.
pub fn semantic_subject(tool: &str, params: &serde_json::Value) -> String {
    let field = |key: &str| params.get(key).and_then(|v| v.as_str()).map(str::to_string);
    if is_one_of(tool, SHELL_TOOLS) {
        return field("command").unwrap_or_default();
    }
    if is_one_of(tool, FILE_TOOLS) {
        return field("path")
            .or_else(|| field("pattern"))
            .unwrap_or_default();
    }
    "*".to_string()
}

fn pattern_matches(pattern: &str, subject: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(":*") {
        return match subject.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with(char::is_whitespace),
            None => false,
        };
    }
    match glob::Pattern::new(pattern) {
        Ok(glob) => glob.matches(subject),
        Err(_) => pattern == subject,
    }
}
