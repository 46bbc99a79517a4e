//! Single-shot exec command.

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::Value;
use std::io::{IsTerminal, Write};
use std::sync::Arc;
use std::time::Instant;
use tiller_core::{
    AgentRegistry, ApprovalAction, ChunkCallback, ConfirmCallback, ConfirmRequest, Message,
    RunOptions, RunResult, RunStopReason, RuntimeContext, SubagentExecutor, ToolCall,
    ToolDoneCallback,
};
use tiller_provider::{Chunk, Usage};
use tiller_tools::ToolResult;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// `tiller exec` options.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub agent: Option<String>,
    pub max_turns: Option<usize>,
    pub json: bool,
}

/// Typed error used to propagate deterministic process exit codes.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ExecExitError {
    pub code: i32,
    pub message: String,
}

impl ExecExitError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            code: 1,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            code: 130,
            message: "cancelled".to_string(),
        }
    }
}

/// One line of `--json` output.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ExecEvent {
    SessionStart {
        agent: String,
        provider: String,
        model: String,
        cwd: String,
    },
    Text {
        delta: String,
    },
    Thinking {
        delta: String,
    },
    ToolCall {
        id: String,
        name: String,
    },
    ToolResult {
        id: String,
        name: String,
        arguments: Value,
        is_error: bool,
        output: String,
        metadata: Value,
    },
    Final {
        status: String,
        final_text: String,
        turns: usize,
        usage: Usage,
        elapsed_ms: u128,
        error: Option<String>,
    },
}

impl ExecEvent {
    fn from_chunk(chunk: &Chunk) -> Option<Self> {
        match chunk {
            Chunk::Text { delta } => Some(ExecEvent::Text {
                delta: delta.clone(),
            }),
            Chunk::Thinking { delta } => Some(ExecEvent::Thinking {
                delta: delta.clone(),
            }),
            Chunk::ToolStart { id, name } => Some(ExecEvent::ToolCall {
                id: id.clone(),
                name: name.clone(),
            }),
            Chunk::ToolInput { .. } | Chunk::Done { .. } | Chunk::Error { .. } => None,
        }
    }

    fn from_tool_result(call: &ToolCall, result: &ToolResult) -> Self {
        ExecEvent::ToolResult {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments(),
            is_error: result.is_error,
            output: result.output.clone(),
            metadata: result.metadata.clone(),
        }
    }
}

fn emit(event: &ExecEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::warn!(error = %e, "failed to encode exec event"),
    }
}

/// Execute a single prompt, streaming the answer as it arrives.
pub async fn run(
    runtime: Arc<RuntimeContext>,
    prompt: &str,
    options: ExecOptions,
) -> anyhow::Result<()> {
    let started = Instant::now();
    let profile = AgentRegistry::resolve(options.agent.as_deref())?;
    let model = runtime.providers.default_model().to_string();
    let provider = runtime.providers.create(&model)?;

    if options.json {
        emit(&ExecEvent::SessionStart {
            agent: profile.name.to_string(),
            provider: provider.name().to_string(),
            model: provider.current_model().to_string(),
            cwd: runtime.working_dir.display().to_string(),
        });
    }

    let printer = if options.json {
        json_printer()
    } else {
        text_printer()
    };
    let mut subagents = SubagentExecutor::new(runtime.clone()).with_parent_model(model);
    let mut agent = runtime.agent_for(&profile, provider).on_chunk(printer);
    if !options.json && std::io::stdin().is_terminal() {
        let confirm = stdin_confirm();
        subagents = subagents.with_confirm(confirm.clone());
        agent = agent.on_confirm(confirm);
    }
    let agent = agent.with_task_runner(Arc::new(subagents));

    let cancel = CancellationToken::new();
    let watcher = cancel_on_ctrl_c(cancel.clone(), runtime.clone());

    let max_turns = options.max_turns.unwrap_or(runtime.config.max_turns);
    let mut run_options = RunOptions::default()
        .with_max_turns(max_turns)
        .with_cancel(cancel);
    if options.json {
        let on_tool_done: ToolDoneCallback = Arc::new(|call: &ToolCall, result: &ToolResult| {
            emit(&ExecEvent::from_tool_result(call, result));
        });
        run_options = run_options.on_tool_done(on_tool_done);
    }

    let result = agent.run(vec![Message::user(prompt)], run_options).await;

    if !runtime.tasks.is_empty() {
        eprintln!(
            "waiting for {} background task(s); Ctrl-C cancels them",
            runtime.tasks.len()
        );
    }
    runtime.wait_background().await;
    watcher.abort();

    tracing::info!(
        stop_reason = %result.stop_reason,
        turns = result.turns,
        input_tokens = result.usage.input_tokens,
        output_tokens = result.usage.output_tokens,
        "exec finished"
    );
    finish(&options, &result, started)
}

fn finish(options: &ExecOptions, result: &RunResult, started: Instant) -> anyhow::Result<()> {
    if options.json {
        emit(&ExecEvent::Final {
            status: result.stop_reason.to_string(),
            final_text: result.content.clone(),
            turns: result.turns,
            usage: result.usage,
            elapsed_ms: started.elapsed().as_millis(),
            error: result.error.clone(),
        });
    } else if !result.content.is_empty() && !result.content.ends_with('\n') {
        println!();
    }

    match result.stop_reason {
        RunStopReason::EndTurn => Ok(()),
        RunStopReason::Cancelled => Err(ExecExitError::cancelled().into()),
        RunStopReason::MaxTurns => Err(ExecExitError::failed(format!(
            "stopped after {} turns without finishing",
            result.turns
        ))
        .into()),
        RunStopReason::Error => Err(ExecExitError::failed(
            result
                .error
                .clone()
                .unwrap_or_else(|| "exec failed".to_string()),
        )
        .into()),
    }
}

fn text_printer() -> ChunkCallback {
    Arc::new(|chunk: &Chunk| match chunk {
        Chunk::Text { delta } => {
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(delta.as_bytes());
            let _ = stdout.flush();
        }
        Chunk::ToolStart { name, .. } => eprintln!("\n[{name}]"),
        _ => {}
    })
}

fn json_printer() -> ChunkCallback {
    Arc::new(|chunk: &Chunk| {
        if let Some(event) = ExecEvent::from_chunk(chunk) {
            emit(&event);
        }
    })
}

/// Ask on the terminal. Questions are serialized so concurrent tool calls
/// never share the prompt line.
fn stdin_confirm() -> ConfirmCallback {
    let turn = Arc::new(tokio::sync::Mutex::new(()));
    Arc::new(move |request: ConfirmRequest| -> BoxFuture<'static, ApprovalAction> {
        let turn = turn.clone();
        async move {
            let _guard = turn.lock().await;
            tokio::task::spawn_blocking(move || ask(&request))
                .await
                .unwrap_or(ApprovalAction::Deny)
        }
        .boxed()
    })
}

fn ask(request: &ConfirmRequest) -> ApprovalAction {
    let subject = request
        .diff_context
        .clone()
        .unwrap_or_else(|| request.params.to_string());
    eprint!(
        "\nAllow {} ({subject})? [y]es / [a]lways / [N]o: ",
        request.tool
    );
    let _ = std::io::stderr().flush();

    let mut answer = String::new();
    match std::io::stdin().read_line(&mut answer) {
        Ok(_) => parse_answer(&answer),
        Err(_) => ApprovalAction::Deny,
    }
}

fn parse_answer(answer: &str) -> ApprovalAction {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => ApprovalAction::AllowOnce,
        "a" | "always" => ApprovalAction::AllowAlways,
        _ => ApprovalAction::Deny,
    }
}

fn cancel_on_ctrl_c(cancel: CancellationToken, runtime: Arc<RuntimeContext>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, cancelling run and background tasks");
            cancel.cancel();
            runtime.cancel_background();
        }
    })
}
