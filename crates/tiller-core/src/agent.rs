//! Agent loop implementation.
//!
//! The agent loop is the core processing cycle:
//! 1. Check cancellation, the turn limit and the token budget
//! 2. Stream one turn from the provider
//! 3. Dispatch the requested tool calls through the permission gate
//! 4. Repeat until the model stops asking for tools

use crate::compaction::{needs_compaction, CompactionOutcome, Compactor};
use crate::dispatch::{Dispatcher, ToolDoneCallback};
use crate::error::TurnError;
use crate::message::{system_text, to_provider_messages, Message};
use crate::permission::{ConfirmCallback, PermissionGate};
use crate::turn::collect_turn;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tiller_provider::{Chunk, Provider, Request, ToolDefinition, Usage};
use tiller_tools::{TaskRunner, ToolContext, ToolRegistry};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_TURNS: usize = 50;

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Selected agent name.
    pub agent_name: String,
    /// System prompt, sent ahead of any system messages in the conversation.
    pub system_prompt: Option<String>,
    /// Maximum tokens per response.
    pub max_tokens: Option<usize>,
    pub working_dir: PathBuf,
    pub session_id: String,
    /// Default deadline for one tool call.
    pub tool_timeout: Duration,
    /// Input-token limit of the model. Zero disables the budget check.
    pub context_window: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_name: "default".to_string(),
            system_prompt: None,
            max_tokens: None,
            working_dir: std::env::current_dir().unwrap_or_default(),
            session_id: ulid::Ulid::new().to_string(),
            tool_timeout: Duration::from_secs(120),
            context_window: 0,
        }
    }
}

/// Callback receiving every streamed chunk as it arrives.
pub type ChunkCallback = Arc<dyn Fn(&Chunk) + Send + Sync>;

/// Per-invocation options of [`Agent::run`].
#[derive(Clone)]
pub struct RunOptions {
    pub max_turns: usize,
    pub on_tool_done: Option<ToolDoneCallback>,
    pub cancel: CancellationToken,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            on_tool_done: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl RunOptions {
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn on_tool_done(mut self, callback: ToolDoneCallback) -> Self {
        self.on_tool_done = Some(callback);
        self
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStopReason {
    EndTurn,
    MaxTurns,
    Cancelled,
    Error,
}

impl RunStopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStopReason::EndTurn => "end_turn",
            RunStopReason::MaxTurns => "max_turns",
            RunStopReason::Cancelled => "cancelled",
            RunStopReason::Error => "error",
        }
    }
}

impl std::fmt::Display for RunStopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one [`Agent::run`].
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Text of the last assistant turn.
    pub content: String,
    pub stop_reason: RunStopReason,
    pub error: Option<String>,
    /// Completed provider turns.
    pub turns: usize,
    /// Usage summed over every turn, compaction requests excluded.
    pub usage: Usage,
    /// The final conversation.
    pub messages: Vec<Message>,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.stop_reason == RunStopReason::EndTurn
    }
}

/// The agent that orchestrates provider turns and tool execution.
pub struct Agent {
    provider: Arc<dyn Provider>,
    tools: ToolRegistry,
    gate: PermissionGate,
    config: AgentConfig,
    compactor: Option<Compactor>,
    on_chunk: Option<ChunkCallback>,
    on_confirm: Option<ConfirmCallback>,
    task_runner: Option<Arc<dyn TaskRunner>>,
}

impl Agent {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: ToolRegistry,
        gate: PermissionGate,
        config: AgentConfig,
    ) -> Self {
        Self {
            provider,
            tools,
            gate,
            config,
            compactor: None,
            on_chunk: None,
            on_confirm: None,
            task_runner: None,
        }
    }

    /// Enable compaction when the token budget runs out.
    pub fn with_compactor(mut self, compactor: Compactor) -> Self {
        self.compactor = Some(compactor);
        self
    }

    /// Set the observer for streamed chunks.
    pub fn on_chunk(mut self, callback: ChunkCallback) -> Self {
        self.on_chunk = Some(callback);
        self
    }

    /// Set the callback answering `Prompt` decisions.
    pub fn on_confirm(mut self, callback: ConfirmCallback) -> Self {
        self.on_confirm = Some(callback);
        self
    }

    /// Runner used by the `task` tool.
    pub fn with_task_runner(mut self, runner: Arc<dyn TaskRunner>) -> Self {
        self.task_runner = Some(runner);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Drive `conversation` until the model stops requesting tools, the turn
    /// limit is hit, the run is cancelled or the provider fails.
    ///
    /// Never fails: the outcome is in [`RunResult::stop_reason`].
    pub async fn run(&self, conversation: Vec<Message>, options: RunOptions) -> RunResult {
        let mut state = RunState::new(conversation);
        if state.messages.is_empty() {
            return state.finish(
                RunStopReason::Error,
                Some("cannot run an empty conversation".to_string()),
            );
        }

        let cancel = &options.cancel;
        let max_turns = options.max_turns.max(1);
        let ctx = ToolContext {
            working_dir: self.config.working_dir.clone(),
            session_id: self.config.session_id.clone(),
            timeout: self.config.tool_timeout,
            cancel: cancel.child_token(),
            task_runner: self.task_runner.clone(),
        };
        let tool_definitions = self.tool_definitions();
        let mut last_input_tokens = 0;

        loop {
            if cancel.is_cancelled() {
                return state.finish(RunStopReason::Cancelled, None);
            }
            if state.turns >= max_turns {
                tracing::info!(agent = %self.config.agent_name, max_turns, "turn limit reached");
                return state.finish(RunStopReason::MaxTurns, None);
            }
            if needs_compaction(last_input_tokens, self.config.context_window) {
                self.compact(&mut state.messages, last_input_tokens, cancel)
                    .await;
            }

            let request = self.build_request(&state.messages, tool_definitions.clone());
            tracing::debug!(
                agent = %self.config.agent_name,
                turn = state.turns + 1,
                messages = request.messages.len(),
                "starting turn"
            );

            let stream = tokio::select! {
                biased;
                _ = cancel.cancelled() => return state.finish(RunStopReason::Cancelled, None),
                stream = self.provider.stream(request) => stream,
            };
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "provider request failed");
                    return state.finish(RunStopReason::Error, Some(e.to_string()));
                }
            };

            let turn = collect_turn(stream, cancel, |chunk| {
                if let Some(cb) = &self.on_chunk {
                    cb(chunk);
                }
            })
            .await;
            let turn = match turn {
                Ok(turn) => turn,
                Err(TurnError::Cancelled) => return state.finish(RunStopReason::Cancelled, None),
                Err(e) => {
                    tracing::warn!(error = %e, "turn failed");
                    return state.finish(RunStopReason::Error, Some(e.to_string()));
                }
            };

            state.turns += 1;
            state.usage.accumulate(turn.usage);
            last_input_tokens = turn.usage.input_tokens;
            state.content = turn.content.clone();
            state.messages.push(turn.to_message());

            if !turn.wants_tools() {
                return state.finish(RunStopReason::EndTurn, None);
            }

            tracing::debug!(calls = turn.tool_calls.len(), "dispatching tool calls");
            let results = Dispatcher {
                tools: &self.tools,
                gate: &self.gate,
                confirm: self.on_confirm.as_ref(),
                on_tool_done: options.on_tool_done.as_ref(),
                ctx: &ctx,
                cancel,
            }
            .dispatch(&turn.tool_calls)
            .await;
            state.messages.extend(results);
        }
    }

    /// Compact in place. Failures are logged and the run continues with the
    /// history unchanged.
    async fn compact(
        &self,
        messages: &mut Vec<Message>,
        input_tokens: usize,
        cancel: &CancellationToken,
    ) {
        let Some(compactor) = &self.compactor else {
            return;
        };
        if !compactor.settings().enabled {
            return;
        }

        let limit = self.config.context_window;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            outcome = compactor.compact_history(messages, input_tokens, limit, None) => outcome,
        };
        match outcome {
            Ok(CompactionOutcome::Skipped) => {
                tracing::debug!(input_tokens, limit, "nothing to compact");
            }
            Ok(outcome) => tracing::info!(?outcome, input_tokens, limit, "compacted conversation"),
            Err(e) => tracing::warn!(error = %e, "compaction failed; continuing"),
        }
    }

    fn build_request(&self, messages: &[Message], tools: Vec<ToolDefinition>) -> Request {
        let system = match (self.config.system_prompt.as_deref(), system_text(messages)) {
            (Some(prompt), Some(extra)) => Some(format!("{prompt}\n\n{extra}")),
            (Some(prompt), None) => Some(prompt.to_string()),
            (None, extra) => extra,
        };
        Request {
            messages: to_provider_messages(messages),
            tools,
            system,
            max_tokens: self.config.max_tokens,
        }
    }

    /// Build tool definitions for the provider.
    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .all()
            .iter()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }
}

struct RunState {
    messages: Vec<Message>,
    content: String,
    turns: usize,
    usage: Usage,
}

impl RunState {
    fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            content: String::new(),
            turns: 0,
            usage: Usage::default(),
        }
    }

    fn finish(self, stop_reason: RunStopReason, error: Option<String>) -> RunResult {
        tracing::debug!(%stop_reason, turns = self.turns, "run finished");
        RunResult {
            content: self.content,
            stop_reason,
            error,
            turns: self.turns,
            usage: self.usage,
            messages: self.messages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompactionSettings;
    use crate::message::{ContentBlock, Role};
    use crate::permission::{ApprovalCache, Decision, PermissionPolicy, PermissionRule, RuleSet};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tiller_provider::mock::{MockProvider, MockTurn};
    use tiller_provider::StopReason;
    use tiller_tools::{Tool, ToolError, ToolResult};

    /// Counts calls and echoes its `value` argument.
    struct EchoTool {
        name: &'static str,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }
        fn label(&self) -> &str {
            "Echo"
        }
        fn description(&self) -> &str {
            "Echo the value argument"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {"value": {"type": "string"}}})
        }
        fn is_concurrency_safe(&self) -> bool {
            true
        }
        async fn execute(
            &self,
            args: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolResult, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ToolResult::success(format!(
                "echo: {}",
                args["value"].as_str().unwrap_or_default()
            )))
        }
    }

    fn echo_tools(name: &'static str) -> (ToolRegistry, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(EchoTool {
            name,
            calls: calls.clone(),
        }));
        (tools, calls)
    }

    fn agent(provider: &Arc<MockProvider>, tools: ToolRegistry) -> Agent {
        Agent::new(
            provider.clone(),
            tools,
            PermissionGate::permit_all(),
            AgentConfig::default(),
        )
    }

    fn tool_results(messages: &[Message]) -> Vec<(String, String, bool)> {
        messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .map(|m| match &m.content[0] {
                ContentBlock::ToolResult {
                    tool_call_id,
                    content,
                    is_error,
                    ..
                } => (tool_call_id.clone(), content.clone(), *is_error),
                other => panic!("unexpected block {other:?}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_plain_answer_ends_turn() {
        let provider = Arc::new(MockProvider::new("mock-model"));
        provider.push_text("hello world", Usage::new(10, 5));
        let agent = agent(&provider, ToolRegistry::new());

        let result = agent
            .run(vec![Message::user("hi")], RunOptions::default())
            .await;

        assert_eq!(result.stop_reason, RunStopReason::EndTurn);
        assert_eq!(result.content, "hello world");
        assert_eq!(result.turns, 1);
        assert_eq!(result.usage, Usage::new(10, 5));
        assert_eq!(result.messages.len(), 2);
        assert_eq!(result.messages[1].role, Role::Assistant);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_tool_round_trip() {
        let provider = Arc::new(MockProvider::new("mock-model"));
        provider
            .push_tool_calls(&[("c1", "MyTool", r#"{"value":"x"}"#)], Usage::new(10, 5))
            .push_text("done after tool", Usage::new(20, 3));
        let (tools, calls) = echo_tools("MyTool");
        let agent = agent(&provider, tools);

        let result = agent
            .run(vec![Message::user("use the tool")], RunOptions::default())
            .await;

        assert_eq!(result.stop_reason, RunStopReason::EndTurn);
        assert_eq!(result.turns, 2);
        assert_eq!(result.content, "done after tool");
        assert_eq!(result.usage, Usage::new(30, 8));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            tool_results(&result.messages),
            vec![("c1".to_string(), "echo: x".to_string(), false)]
        );

        // The second request carried the tool result back to the model.
        let second = &provider.requests()[1];
        assert_eq!(second.messages.len(), 3);
        assert_eq!(second.messages[2].role, "tool");
        assert_eq!(second.tools.len(), 1);
    }

    #[tokio::test]
    async fn test_results_match_calls_in_order() {
        let provider = Arc::new(MockProvider::new("mock-model"));
        provider
            .push_tool_calls(
                &[
                    ("a", "echo", r#"{"value":"1"}"#),
                    ("b", "missing", "{}"),
                    ("c", "echo", r#"{"value":"3"}"#),
                ],
                Usage::new(1, 1),
            )
            .push_text("ok", Usage::new(1, 1));
        let (tools, calls) = echo_tools("echo");
        let agent = agent(&provider, tools);

        let result = agent
            .run(vec![Message::user("go")], RunOptions::default())
            .await;

        let results = tool_results(&result.messages);
        let ids: Vec<&str> = results.iter().map(|(id, _, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(results[1].2);
        assert!(results[1].1.contains("missing"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_single_turn_limit() {
        let provider = Arc::new(MockProvider::new("mock-model"));
        for i in 0..2 {
            let id = format!("c{i}");
            provider.push_tool_calls(&[(id.as_str(), "echo", "{}")], Usage::new(5, 1));
        }
        let (tools, _) = echo_tools("echo");
        let agent = agent(&provider, tools);

        let result = agent
            .run(
                vec![Message::user("loop")],
                RunOptions::default().with_max_turns(1),
            )
            .await;

        assert_eq!(result.stop_reason, RunStopReason::MaxTurns);
        assert_eq!(result.turns, 1);
        assert_eq!(provider.stream_calls(), 1);
    }

    #[tokio::test]
    async fn test_max_turns_stops_queued_tool_loop() {
        let provider = Arc::new(MockProvider::new("mock-model"));
        for i in 0..10 {
            let id = format!("c{i}");
            provider.push_tool_calls(&[(id.as_str(), "echo", "{}")], Usage::new(5, 1));
        }
        let (tools, calls) = echo_tools("echo");
        let agent = agent(&provider, tools);

        let result = agent
            .run(
                vec![Message::user("loop")],
                RunOptions::default().with_max_turns(3),
            )
            .await;

        assert_eq!(result.stop_reason, RunStopReason::MaxTurns);
        assert_eq!(result.turns, 3);
        assert_eq!(result.usage, Usage::new(15, 3));
        assert_eq!(provider.remaining_turns(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancel_before_first_turn() {
        let provider = Arc::new(MockProvider::new("mock-model"));
        provider.push_text("never", Usage::new(10, 5));
        let agent = agent(&provider, ToolRegistry::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = agent
            .run(
                vec![Message::user("hi")],
                RunOptions::default().with_cancel(cancel),
            )
            .await;

        assert_eq!(result.stop_reason, RunStopReason::Cancelled);
        assert_eq!(result.turns, 0);
        assert_eq!(result.usage, Usage::default());
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_while_streaming() {
        let provider = Arc::new(MockProvider::new("mock-model"));
        provider.push_turn(MockTurn::Hang(vec![Chunk::Text {
            delta: "partial".to_string(),
        }]));
        let seen = Arc::new(Mutex::new(String::new()));
        let sink = seen.clone();
        let agent = agent(&provider, ToolRegistry::new()).on_chunk(Arc::new(move |chunk: &Chunk| {
            if let Chunk::Text { delta } = chunk {
                sink.lock().unwrap().push_str(delta);
            }
        }));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let result = agent
            .run(
                vec![Message::user("hi")],
                RunOptions::default().with_cancel(cancel),
            )
            .await;

        assert_eq!(result.stop_reason, RunStopReason::Cancelled);
        assert_eq!(result.turns, 0);
        assert_eq!(*seen.lock().unwrap(), "partial");
        assert_eq!(result.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_conversation_is_an_error() {
        let provider = Arc::new(MockProvider::new("mock-model"));
        let agent = agent(&provider, ToolRegistry::new());

        let result = agent.run(Vec::new(), RunOptions::default()).await;

        assert_eq!(result.stop_reason, RunStopReason::Error);
        assert!(result.error.is_some());
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_error_chunk_stops_run() {
        let provider = Arc::new(MockProvider::new("mock-model"));
        provider.push_turn(MockTurn::Chunks(vec![
            Chunk::Text {
                delta: "half".to_string(),
            },
            Chunk::Error {
                message: "overloaded".to_string(),
            },
        ]));
        let agent = agent(&provider, ToolRegistry::new());

        let result = agent
            .run(vec![Message::user("hi")], RunOptions::default())
            .await;

        assert_eq!(result.stop_reason, RunStopReason::Error);
        assert!(result.error.unwrap().contains("overloaded"));
        assert_eq!(result.turns, 0);
    }

    #[tokio::test]
    async fn test_max_tokens_ends_run() {
        let provider = Arc::new(MockProvider::new("mock-model"));
        provider.push_turn(MockTurn::Chunks(vec![
            Chunk::Text {
                delta: "cut".to_string(),
            },
            Chunk::Done {
                reason: StopReason::MaxTokens,
                usage: Usage::new(3, 4096),
            },
        ]));
        let agent = agent(&provider, ToolRegistry::new());

        let result = agent
            .run(vec![Message::user("long")], RunOptions::default())
            .await;
        assert_eq!(result.stop_reason, RunStopReason::EndTurn);
        assert_eq!(result.content, "cut");
    }

    #[tokio::test]
    async fn test_denied_tool_is_reported_to_model() {
        let provider = Arc::new(MockProvider::new("mock-model"));
        provider
            .push_tool_calls(&[("c1", "echo", r#"{"value":"x"}"#)], Usage::new(1, 1))
            .push_text("understood", Usage::new(1, 1));
        let (tools, calls) = echo_tools("echo");
        let gate = PermissionGate::new(
            PermissionPolicy::Rules(RuleSet::new(
                vec![
                    PermissionRule::allow("echo", "*"),
                    PermissionRule::deny("echo", "*"),
                ],
                Decision::Permit,
            )),
            ApprovalCache::new(),
        );
        let agent = Agent::new(provider.clone(), tools, gate, AgentConfig::default());
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = finished.clone();
        let options = RunOptions::default().on_tool_done(Arc::new(
            move |_: &crate::message::ToolCall, result: &ToolResult| {
                assert!(result.is_error);
                counter.fetch_add(1, Ordering::SeqCst);
            },
        ));

        let result = agent.run(vec![Message::user("echo")], options).await;

        assert_eq!(result.stop_reason, RunStopReason::EndTurn);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(tool_results(&result.messages)[0].1.contains("permission denied"));
    }

    #[tokio::test]
    async fn test_budget_triggers_compaction() {
        let provider = Arc::new(MockProvider::new("mock-model"));
        provider
            .push_tool_calls(&[("c1", "echo", r#"{"value":"x"}"#)], Usage::new(960, 10))
            .push_completion("user asked for an echo")
            .push_text("finished", Usage::new(200, 10));
        let (tools, _) = echo_tools("echo");
        let config = AgentConfig {
            context_window: 1_000,
            ..AgentConfig::default()
        };
        let compactor = Compactor::new(
            provider.clone(),
            CompactionSettings {
                enabled: true,
                protect_tokens: 0,
                prune_minimum_tokens: 0,
            },
        );
        let agent = Agent::new(provider.clone(), tools, PermissionGate::permit_all(), config)
            .with_compactor(compactor);

        let result = agent
            .run(vec![Message::user("echo x")], RunOptions::default())
            .await;

        assert_eq!(result.stop_reason, RunStopReason::EndTurn);
        assert_eq!(provider.complete_calls(), 1);
        assert!(result.messages[0].is_summary);
        assert_eq!(result.messages[1].role, Role::Assistant);
        assert_eq!(result.messages[2].role, Role::Tool);
        // Usage keeps counting the pre-compaction turns.
        assert_eq!(result.usage, Usage::new(1_160, 20));
    }

    #[tokio::test]
    async fn test_failed_compaction_keeps_running() {
        let provider = Arc::new(MockProvider::new("mock-model"));
        provider
            .push_tool_calls(&[("c1", "echo", "{}")], Usage::new(990, 10))
            .push_completion_error("summarizer down")
            .push_text("still here", Usage::new(995, 10));
        let (tools, _) = echo_tools("echo");
        let config = AgentConfig {
            context_window: 1_000,
            ..AgentConfig::default()
        };
        let compactor = Compactor::new(
            provider.clone(),
            CompactionSettings {
                enabled: true,
                protect_tokens: 0,
                prune_minimum_tokens: 0,
            },
        );
        let agent = Agent::new(provider.clone(), tools, PermissionGate::permit_all(), config)
            .with_compactor(compactor);

        let result = agent
            .run(vec![Message::user("echo")], RunOptions::default())
            .await;

        assert_eq!(result.stop_reason, RunStopReason::EndTurn);
        assert_eq!(provider.complete_calls(), 1);
        assert_eq!(result.content, "still here");
        assert_eq!(result.messages.len(), 4);
        assert!(!result.messages[0].is_summary);
    }

    #[tokio::test]
    async fn test_system_prompt_and_messages_merge() {
        let provider = Arc::new(MockProvider::new("mock-model"));
        provider.push_text("ok", Usage::new(1, 1));
        let config = AgentConfig {
            system_prompt: Some("You are terse.".to_string()),
            ..AgentConfig::default()
        };
        let agent = Agent::new(
            provider.clone(),
            ToolRegistry::new(),
            PermissionGate::permit_all(),
            config,
        );

        agent
            .run(
                vec![Message::system("Repo uses tabs."), Message::user("hi")],
                RunOptions::default(),
            )
            .await;

        let request = &provider.requests()[0];
        assert_eq!(
            request.system.as_deref(),
            Some("You are terse.\n\nRepo uses tabs.")
        );
        assert_eq!(request.messages.len(), 1);
    }
}
