//! Subagent execution.
//!
//! A subagent is a fresh [`Agent`](crate::agent::Agent) running one of the built-in subagent
//! profiles with its own conversation, seeded with the delegated prompt. It
//! shares the runtime (tools, approvals, model cache) with its parent but
//! only sees the tools its profile allows.

use crate::agent::{ChunkCallback, RunOptions, RunStopReason};
use crate::agent_registry::{unknown_agent, AgentRegistry};
use crate::background::{BackgroundJob, BackgroundTaskManager};
use crate::context::RuntimeContext;
use crate::dispatch::ToolDoneCallback;
use crate::message::Message;
use crate::permission::ConfirmCallback;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tiller_provider::Usage;
use tiller_tools::{TaskExecution, TaskRequest, TaskRunner, ToolError};
use tokio_util::sync::CancellationToken;

/// A delegated run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubagentRequest {
    pub agent_name: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_override: Option<String>,
}

impl SubagentRequest {
    pub fn new(agent_name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Short label for logs and task listings.
    pub fn label(&self) -> String {
        match &self.description {
            Some(description) => format!("{}: {description}", self.agent_name),
            None => self.agent_name.clone(),
        }
    }
}

impl From<TaskRequest> for SubagentRequest {
    fn from(request: TaskRequest) -> Self {
        Self {
            agent_name: request.agent,
            prompt: request.prompt,
            description: request.description,
            max_turns: request.max_turns,
            model_override: request.model,
        }
    }
}

/// Outcome of a subagent run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_name: String,
    pub success: bool,
    /// Final assistant text; may be partial when `success` is false.
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub turns: usize,
    pub usage: Usage,
}

impl AgentResult {
    fn failure(agent_name: &str, error: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            success: false,
            content: String::new(),
            error: Some(error.into()),
            turns: 0,
            usage: Usage::default(),
        }
    }
}

impl From<AgentResult> for TaskExecution {
    fn from(result: AgentResult) -> Self {
        Self {
            agent: result.agent_name,
            success: result.success,
            content: result.content,
            error: result.error,
            turns: result.turns,
            background_task_id: None,
        }
    }
}

/// Runs subagents on behalf of an agent at `depth` (0 for a primary agent).
#[derive(Clone)]
pub struct SubagentExecutor {
    runtime: Arc<RuntimeContext>,
    confirm: Option<ConfirmCallback>,
    on_chunk: Option<ChunkCallback>,
    on_tool_done: Option<ToolDoneCallback>,
    parent_model: Option<String>,
    depth: usize,
}

impl SubagentExecutor {
    pub fn new(runtime: Arc<RuntimeContext>) -> Self {
        Self {
            runtime,
            confirm: None,
            on_chunk: None,
            on_tool_done: None,
            parent_model: None,
            depth: 0,
        }
    }

    /// Model inherited by subagents that do not override it.
    pub fn with_parent_model(mut self, model: impl Into<String>) -> Self {
        self.parent_model = Some(model.into());
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// Confirmation callback for `Prompt` decisions inside the subagent.
    pub fn with_confirm(mut self, confirm: ConfirmCallback) -> Self {
        self.confirm = Some(confirm);
        self
    }

    /// Observe the chunks of the subagent's own turns.
    pub fn on_chunk(mut self, callback: ChunkCallback) -> Self {
        self.on_chunk = Some(callback);
        self
    }

    /// Observe the subagent's own tool completions.
    pub fn on_tool_done(mut self, callback: ToolDoneCallback) -> Self {
        self.on_tool_done = Some(callback);
        self
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Run `request` to completion. Every failure is reported in the result.
    pub async fn run(&self, request: SubagentRequest, cancel: CancellationToken) -> AgentResult {
        let Some(profile) = AgentRegistry::get(&request.agent_name) else {
            return AgentResult::failure(
                &request.agent_name,
                unknown_agent(&request.agent_name).to_string(),
            );
        };
        if !profile.is_subagent() {
            return AgentResult::failure(
                profile.name,
                format!("Agent '{}' is not a subagent", profile.name),
            );
        }

        let depth = self.depth + 1;
        let max_depth = self.runtime.config.subagents.max_depth;
        if depth > max_depth {
            tracing::warn!(agent = profile.name, depth, max_depth, "subagent depth limit reached");
            return AgentResult::failure(
                profile.name,
                format!("subagent nesting limit reached (max depth {max_depth})"),
            );
        }

        let model = request
            .model_override
            .clone()
            .or_else(|| self.parent_model.clone())
            .unwrap_or_else(|| self.runtime.providers.default_model().to_string());
        let provider = match self.runtime.providers.create(&model) {
            Ok(provider) => provider,
            Err(e) => return AgentResult::failure(profile.name, e.to_string()),
        };

        let child_runner = Self::new(self.runtime.clone())
            .with_parent_model(model.clone())
            .with_depth(depth);
        let child_runner = match &self.confirm {
            Some(confirm) => child_runner.with_confirm(confirm.clone()),
            None => child_runner,
        };

        let mut agent = self
            .runtime
            .agent_for(&profile, provider)
            .with_task_runner(Arc::new(child_runner));
        if let Some(confirm) = &self.confirm {
            agent = agent.on_confirm(confirm.clone());
        }
        if let Some(on_chunk) = &self.on_chunk {
            agent = agent.on_chunk(on_chunk.clone());
        }

        let max_turns = request
            .max_turns
            .unwrap_or(self.runtime.config.subagents.max_turns);
        let options = RunOptions {
            max_turns,
            on_tool_done: self.on_tool_done.clone(),
            cancel,
        };

        tracing::info!(agent = profile.name, %model, depth, max_turns, "starting subagent");
        let result = agent
            .run(vec![Message::user(request.prompt.clone())], options)
            .await;
        tracing::info!(
            agent = profile.name,
            stop_reason = %result.stop_reason,
            turns = result.turns,
            "subagent finished"
        );

        let error = match result.stop_reason {
            RunStopReason::EndTurn => None,
            RunStopReason::MaxTurns => Some(format!(
                "subagent reached max turns ({max_turns}) before finishing"
            )),
            RunStopReason::Cancelled => Some("subagent was cancelled".to_string()),
            RunStopReason::Error => Some(
                result
                    .error
                    .unwrap_or_else(|| "subagent run failed".to_string()),
            ),
        };
        AgentResult {
            agent_name: profile.name.to_string(),
            success: error.is_none(),
            content: result.content,
            error,
            turns: result.turns,
            usage: result.usage,
        }
    }
}

#[async_trait]
impl TaskRunner for SubagentExecutor {
    async fn run_task(
        &self,
        request: TaskRequest,
        cancel: CancellationToken,
    ) -> Result<TaskExecution, ToolError> {
        let background = request.background;
        let request = SubagentRequest::from(request);

        if background {
            let agent = request.agent_name.clone();
            let handle = BackgroundTaskManager::new(self.runtime.clone())
                .with_depth(self.depth)
                .run_background(BackgroundJob::Agent(request))
                .map_err(|e| ToolError::ExecutionError(e.to_string()))?;
            return Ok(TaskExecution {
                agent,
                success: true,
                background_task_id: Some(handle.id().to_string()),
                ..Default::default()
            });
        }

        Ok(self.run(request, cancel).await.into())
    }
}
