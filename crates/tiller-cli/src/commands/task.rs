//! Background task commands.
//!
//! `start` creates the task on disk and hands it to a detached
//! `tiller task worker` process; everything else reads the task directory.

use super::exec::ExecExitError;
use super::ProviderArgs;
use serde_json::Value;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tiller_core::{BackgroundJob, BackgroundTaskManager, RuntimeContext, SubagentRequest};
use tiller_store::{
    event_type, now_millis, TaskEvent, TaskKind, TaskMeta, TaskState, TaskStatusRecord, TaskStore,
};

/// Agent used when `task start` names none.
pub const DEFAULT_TASK_AGENT: &str = "general";

const FOLLOW_INTERVAL: Duration = Duration::from_millis(500);
const WORKER_LOG: &str = "worker.log";

/// What to run, from `task start` or `task worker` arguments.
pub fn job_from_args(
    agent: Option<String>,
    prompt: Option<String>,
    command: Option<String>,
    timeout_secs: Option<u64>,
) -> anyhow::Result<BackgroundJob> {
    match (command, prompt) {
        (Some(command), _) => Ok(BackgroundJob::Command {
            command,
            timeout: timeout_secs.map(Duration::from_secs),
        }),
        (None, Some(prompt)) => Ok(BackgroundJob::Agent(SubagentRequest::new(
            agent.unwrap_or_else(|| DEFAULT_TASK_AGENT.to_string()),
            prompt,
        ))),
        (None, None) => anyhow::bail!("a prompt or --command is required"),
    }
}

/// Arguments that make a worker process run `job` for task `id`.
fn worker_args(id: &str, job: &BackgroundJob) -> Vec<String> {
    let mut args = vec![
        "task".to_string(),
        "worker".to_string(),
        "--id".to_string(),
        id.to_string(),
    ];
    match job {
        BackgroundJob::Agent(request) => {
            args.extend([
                "--agent".to_string(),
                request.agent_name.clone(),
                "--prompt".to_string(),
                request.prompt.clone(),
            ]);
        }
        BackgroundJob::Command { command, timeout } => {
            args.extend(["--command".to_string(), command.clone()]);
            if let Some(timeout) = timeout {
                args.extend(["--timeout-secs".to_string(), timeout.as_secs().to_string()]);
            }
        }
    }
    args
}

/// Create the task and spawn its worker. Prints the task id.
pub fn start(
    runtime: &RuntimeContext,
    provider_args: &ProviderArgs,
    job: BackgroundJob,
) -> anyhow::Result<()> {
    let id = TaskStore::new_task_id();
    let meta = TaskMeta {
        id: id.clone(),
        kind: job.kind(),
        label: job.label(),
        created_at: now_millis(),
        cwd: runtime.working_dir.display().to_string(),
    };
    runtime.store.create(&meta)?;

    let worker_log = std::fs::File::create(runtime.store.task_dir(&id).join(WORKER_LOG))?;
    let mut command = std::process::Command::new(std::env::current_exe()?);
    command
        .args(provider_args.to_args())
        .args(worker_args(&id, &job))
        .current_dir(&runtime.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::from(worker_log));
    #[cfg(unix)]
    {
        // Own process group, so Ctrl-C in this terminal leaves the worker alone.
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    match command.spawn() {
        Ok(child) => {
            tracing::info!(task_id = %id, pid = child.id(), "started task worker");
            println!("{id}");
            Ok(())
        }
        Err(e) => {
            let log = runtime.store.open(&id)?;
            log.write_status(&TaskStatusRecord {
                status: TaskState::Failed,
                error: Some(format!("failed to start worker: {e}")),
                ..TaskStatusRecord::running()
            })?;
            Err(anyhow::anyhow!("failed to start worker for task {id}: {e}"))
        }
    }
}

/// Run an already created task in this process until it finishes.
pub async fn worker(runtime: Arc<RuntimeContext>, id: &str, job: BackgroundJob) -> anyhow::Result<()> {
    let handle = BackgroundTaskManager::new(runtime.clone()).run_existing(id, job)?;

    let signals = runtime.clone();
    let watcher = tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("worker interrupted, cancelling task");
        signals.cancel_background();
    });

    let state = handle.wait().await;
    runtime.wait_background().await;
    watcher.abort();

    match state {
        TaskState::Done => Ok(()),
        TaskState::Cancelled => Err(ExecExitError::cancelled().into()),
        other => Err(ExecExitError::failed(format!("task {id} finished as {other}")).into()),
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut terminate) = signal(SignalKind::terminate()) {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
            return;
        }
    }
    let _ = tokio::signal::ctrl_c().await;
}

pub async fn list(store: &TaskStore) -> anyhow::Result<()> {
    let tasks = store.list().await?;
    if tasks.is_empty() {
        println!("No background tasks.");
        return Ok(());
    }

    for task in &tasks {
        let status = task
            .status
            .as_ref()
            .map(|record| record.status.as_str())
            .unwrap_or("unknown");
        println!(
            "{} | {:<9} | {:<7} | {}",
            task.meta.id,
            status,
            kind_label(task.meta.kind),
            shorten(&task.meta.label, 60)
        );
    }
    Ok(())
}

pub async fn show(store: &TaskStore, id: &str) -> anyhow::Result<()> {
    let snapshot = store.load(id).await?;
    let meta = &snapshot.meta;
    let status = &snapshot.status;

    println!("id: {}", meta.id);
    println!("kind: {}", kind_label(meta.kind));
    println!("label: {}", meta.label);
    println!("cwd: {}", meta.cwd);
    println!("created_at: {}", meta.created_at);
    println!("status: {}", status.status);
    if let Some(count) = status.tool_count {
        println!("tool_calls: {count}");
    }
    println!("bytes_written: {}", status.bytes_written);
    if let Some(error) = &status.error {
        println!("error: {error}");
    }

    let output = snapshot.output_text();
    if !output.is_empty() {
        println!("output:");
        println!("{}", output.trim_end());
    }
    Ok(())
}

/// Print the event log; with `follow`, keep polling until the task is
/// terminal.
pub async fn log(store: &TaskStore, id: &str, follow: bool) -> anyhow::Result<()> {
    let mut offset = 0;
    loop {
        // Terminal status is written after the last event, so checking it
        // first guarantees the read below sees everything.
        let finished = !follow || store.read_status(id).await?.status.is_terminal();

        let batch = store.read_events_from(id, offset).await?;
        for event in &batch.events {
            if let Some(line) = format_event(event) {
                print!("{line}");
            }
        }
        offset = batch.next_offset;

        if finished {
            return Ok(());
        }
        tokio::time::sleep(FOLLOW_INTERVAL).await;
    }
}

/// Human-readable rendering of one event, newline included. Streamed text
/// is printed as-is so deltas join back up.
fn format_event(event: &TaskEvent) -> Option<String> {
    let data = &event.data;
    let line = match event.kind.as_str() {
        event_type::TEXT | event_type::OUTPUT => return Some(str_field(data, "text").to_string()),
        event_type::THINKING => return None,
        event_type::START => format!("[start] {}", start_label(data)),
        event_type::TOOL_CALL => format!("[tool_call] {}", str_field(data, "name")),
        event_type::TOOL_RESULT => {
            let marker = if data["is_error"].as_bool().unwrap_or(false) {
                " (error)"
            } else {
                ""
            };
            format!("[tool_result] {}{marker}", str_field(data, "name"))
        }
        event_type::ERROR => format!("[error] {}", str_field(data, "message")),
        event_type::END => match data["error"].as_str() {
            Some(error) => format!("[end] {}: {error}", str_field(data, "status")),
            None => format!("[end] {}", str_field(data, "status")),
        },
        other => format!("[{other}] {data}"),
    };
    Some(format!("\n{line}\n"))
}

fn start_label(data: &Value) -> String {
    match data["kind"].as_str() {
        Some("agent") => format!(
            "{}: {}",
            str_field(data, "agent"),
            shorten(str_field(data, "prompt"), 60)
        ),
        _ => str_field(data, "command").to_string(),
    }
}

fn str_field<'a>(data: &'a Value, key: &str) -> &'a str {
    data[key].as_str().unwrap_or_default()
}

fn kind_label(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::Agent => "agent",
        TaskKind::Command => "command",
    }
}

fn shorten(text: &str, max_chars: usize) -> String {
    let first_line = text.lines().next().unwrap_or_default();
    if first_line.chars().count() <= max_chars && first_line.len() == text.len() {
        return first_line.to_string();
    }
    let mut short: String = first_line.chars().take(max_chars).collect();
    short.push_str("...");
    short
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_from_args() {
        let job = job_from_args(None, Some("map the repo".to_string()), None, None).unwrap();
        match job {
            BackgroundJob::Agent(request) => {
                assert_eq!(request.agent_name, DEFAULT_TASK_AGENT);
                assert_eq!(request.prompt, "map the repo");
            }
            _ => panic!("expected agent job"),
        }

        let job = job_from_args(None, None, Some("make".to_string()), Some(30)).unwrap();
        assert!(matches!(
            job,
            BackgroundJob::Command { timeout: Some(t), .. } if t == Duration::from_secs(30)
        ));

        assert!(job_from_args(None, None, None, None).is_err());
    }

    #[test]
    fn test_worker_args_round_trip_through_cli() {
        use crate::cli::{Cli, Commands, TaskAction};
        use clap::Parser;

        let job = BackgroundJob::Command {
            command: "cargo fmt --check".to_string(),
            timeout: Some(Duration::from_secs(9)),
        };
        let mut argv = vec!["tiller".to_string()];
        argv.extend(worker_args("01TASK", &job));
        let cli = Cli::parse_from(argv);
        match cli.command {
            Commands::Task {
                action:
                    TaskAction::Worker {
                        id,
                        command,
                        timeout_secs,
                        ..
                    },
            } => {
                assert_eq!(id, "01TASK");
                assert_eq!(command.as_deref(), Some("cargo fmt --check"));
                assert_eq!(timeout_secs, Some(9));
            }
            _ => panic!("expected task worker"),
        }
    }

    #[test]
    fn test_format_event() {
        let text = TaskEvent::new(event_type::TEXT, json!({"text": "partial "}));
        assert_eq!(format_event(&text).as_deref(), Some("partial "));

        let thinking = TaskEvent::new(event_type::THINKING, json!({"text": "hmm"}));
        assert!(format_event(&thinking).is_none());

        let result = TaskEvent::new(
            event_type::TOOL_RESULT,
            json!({"id": "c1", "name": "bash", "output": "", "is_error": true}),
        );
        assert_eq!(
            format_event(&result).as_deref(),
            Some("\n[tool_result] bash (error)\n")
        );

        let end = TaskEvent::new(event_type::END, json!({"status": "failed", "error": "boom"}));
        assert_eq!(format_event(&end).as_deref(), Some("\n[end] failed: boom\n"));
    }

    #[test]
    fn test_shorten() {
        assert_eq!(shorten("short", 10), "short");
        assert_eq!(shorten("abcdefghijkl", 5), "abcde...");
        assert_eq!(shorten("one\ntwo", 10), "one...");
    }

    #[tokio::test]
    async fn test_log_reads_finished_task() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::with_dir(dir.path());
        let meta = TaskMeta {
            id: "01LOG".to_string(),
            kind: TaskKind::Command,
            label: "echo hi".to_string(),
            created_at: now_millis(),
            cwd: ".".to_string(),
        };
        let mut task = store.create(&meta).unwrap();
        task.append(&TaskEvent::new(event_type::OUTPUT, json!({"text": "hi\n"})))
            .unwrap();
        task.write_status(&TaskStatusRecord {
            status: TaskState::Done,
            ..TaskStatusRecord::running()
        })
        .unwrap();

        log(&store, "01LOG", true).await.unwrap();
        show(&store, "01LOG").await.unwrap();
        assert!(log(&store, "missing", false).await.is_err());
    }
}
