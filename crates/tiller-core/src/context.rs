//! Shared runtime state, built once per process and handed to every agent.

use crate::agent::{Agent, AgentConfig};
use crate::agent_profile::AgentProfile;
use crate::compaction::Compactor;
use crate::config::Config;
use crate::permission::{ApprovalCache, PermissionGate};
use std::path::PathBuf;
use std::sync::Arc;
use tiller_provider::{ModelCache, Provider, ProviderFactory};
use tiller_store::TaskStore;
use tiller_tools::ToolRegistry;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Everything agents, subagents and background tasks share.
///
/// Only the approval cache and the model cache are mutable, and both are
/// internally synchronized.
pub struct RuntimeContext {
    pub config: Config,
    pub providers: Arc<dyn ProviderFactory>,
    pub models: ModelCache,
    pub tools: ToolRegistry,
    pub approvals: ApprovalCache,
    pub store: TaskStore,
    pub working_dir: PathBuf,
    /// In-process background tasks.
    pub tasks: TaskTracker,
    /// Parent of every background task's cancellation token.
    pub background_cancel: CancellationToken,
}

impl RuntimeContext {
    /// Runtime with the built-in tools and the catalog's model metadata.
    pub fn new(
        config: Config,
        providers: Arc<dyn ProviderFactory>,
        store: TaskStore,
        working_dir: PathBuf,
    ) -> Self {
        Self {
            config,
            providers,
            models: ModelCache::from_catalog(),
            tools: tiller_tools::builtin_registry(),
            approvals: ApprovalCache::new(),
            store,
            working_dir,
            tasks: TaskTracker::new(),
            background_cancel: CancellationToken::new(),
        }
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_models(mut self, models: ModelCache) -> Self {
        self.models = models;
        self
    }

    /// Gate over the configured policy and the shared session approvals.
    pub fn gate(&self) -> PermissionGate {
        PermissionGate::new(self.config.permissions.to_policy(), self.approvals.clone())
    }

    pub fn compactor_for(&self, provider: Arc<dyn Provider>) -> Option<Compactor> {
        self.config
            .compaction
            .enabled
            .then(|| Compactor::new(provider, self.config.compaction.clone()))
    }

    /// Input limit of the provider's current model, from the cache first and
    /// then from what the provider reports about itself.
    pub fn context_window(&self, provider: &dyn Provider) -> usize {
        let model = provider.current_model();
        match self.models.context_window(model) {
            0 => provider
                .models()
                .into_iter()
                .find(|info| info.id == model)
                .map(|info| info.context_window)
                .unwrap_or(0),
            window => window,
        }
    }

    /// The profile's tool view: everything, or only its allow-list.
    pub fn tools_for(&self, profile: &AgentProfile) -> ToolRegistry {
        match profile.tools {
            Some(allowed) => self.tools.restricted(allowed.iter().copied()),
            None => self.tools.clone(),
        }
    }

    /// An agent running `profile` on `provider`, without callbacks or task
    /// runner attached.
    pub fn agent_for(&self, profile: &AgentProfile, provider: Arc<dyn Provider>) -> Agent {
        let config = AgentConfig {
            agent_name: profile.name.to_string(),
            system_prompt: Some(profile.system_prompt.to_string()),
            max_tokens: None,
            working_dir: self.working_dir.clone(),
            session_id: ulid::Ulid::new().to_string(),
            tool_timeout: self.config.tool_timeout(),
            context_window: self.context_window(provider.as_ref()),
        };
        let agent = Agent::new(provider.clone(), self.tools_for(profile), self.gate(), config);
        match self.compactor_for(provider) {
            Some(compactor) => agent.with_compactor(compactor),
            None => agent,
        }
    }

    /// Cancel every in-process background task.
    pub fn cancel_background(&self) {
        self.background_cancel.cancel();
    }

    /// Stop accepting background tasks and wait for the running ones.
    pub async fn wait_background(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }
}
