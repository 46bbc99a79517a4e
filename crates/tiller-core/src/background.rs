//! Background task execution.
//!
//! A background task is a subagent run or a shell command executing on its
//! own tokio task. Its event log, status record and metadata on disk are the
//! source of truth; a [`TaskHandle`] only lets the starter wait or cancel.

use crate::agent::ChunkCallback;
use crate::context::RuntimeContext;
use crate::dispatch::ToolDoneCallback;
use crate::error::TillerError;
use crate::message::ToolCall;
use crate::subagent::{SubagentExecutor, SubagentRequest};
use serde_json::json;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tiller_provider::Chunk;
use tiller_store::{
    event_type, now_millis, StoreError, TaskEvent, TaskKind, TaskLog, TaskMeta, TaskState,
    TaskStatusRecord, TaskStore,
};
use tiller_tools::shell::shell_command;
use tiller_tools::ToolResult;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Work a background task performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackgroundJob {
    Agent(SubagentRequest),
    Command {
        command: String,
        timeout: Option<Duration>,
    },
}

impl BackgroundJob {
    pub fn kind(&self) -> TaskKind {
        match self {
            BackgroundJob::Agent(_) => TaskKind::Agent,
            BackgroundJob::Command { .. } => TaskKind::Command,
        }
    }

    pub fn label(&self) -> String {
        match self {
            BackgroundJob::Agent(request) => request.label(),
            BackgroundJob::Command { command, .. } => command.clone(),
        }
    }
}

/// In-process view of a running background task.
pub struct TaskHandle {
    id: String,
    store: TaskStore,
    cancel: CancellationToken,
    join: JoinHandle<TaskState>,
}

impl TaskHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Request cancellation. The task records its own terminal state.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Latest status record on disk.
    pub async fn status(&self) -> Result<TaskStatusRecord, StoreError> {
        self.store.read_status(&self.id).await
    }

    /// Wait for the task and return its terminal state.
    pub async fn wait(self) -> TaskState {
        match self.join.await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(task_id = %self.id, error = %e, "background task panicked");
                TaskState::Failed
            }
        }
    }
}

/// Starts background tasks on the runtime's task tracker.
pub struct BackgroundTaskManager {
    runtime: Arc<RuntimeContext>,
    depth: usize,
}

impl BackgroundTaskManager {
    pub fn new(runtime: Arc<RuntimeContext>) -> Self {
        Self { runtime, depth: 0 }
    }

    /// Subagent depth of the agent starting the tasks.
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// Create a new task on disk and start it. Returns as soon as the task
    /// is spawned.
    pub fn run_background(&self, job: BackgroundJob) -> Result<TaskHandle, TillerError> {
        let meta = TaskMeta {
            id: TaskStore::new_task_id(),
            kind: job.kind(),
            label: job.label(),
            created_at: now_millis(),
            cwd: self.runtime.working_dir.display().to_string(),
        };
        let log = self.runtime.store.create(&meta)?;
        tracing::info!(task_id = %meta.id, kind = ?meta.kind, label = %meta.label, "starting background task");
        Ok(self.spawn(log, job))
    }

    /// Start `job` for a task that was already created, e.g. by the process
    /// that launched this worker.
    pub fn run_existing(&self, id: &str, job: BackgroundJob) -> Result<TaskHandle, TillerError> {
        let log = self.runtime.store.open(id)?;
        tracing::info!(task_id = %id, "resuming background task");
        Ok(self.spawn(log, job))
    }

    fn spawn(&self, log: TaskLog, job: BackgroundJob) -> TaskHandle {
        let id = log.id().to_string();
        let cancel = self.runtime.background_cancel.child_token();
        let settings = &self.runtime.config.background;
        let worker = Worker {
            runtime: self.runtime.clone(),
            depth: self.depth,
            recorder: Recorder::new(log, settings.max_output_bytes, cancel.clone()),
            cancel: cancel.clone(),
            status_interval: settings.status_interval(),
        };
        let join = self.runtime.tasks.spawn(worker.run(job));
        TaskHandle {
            id,
            store: self.runtime.store.clone(),
            cancel,
            join,
        }
    }
}

struct Worker {
    runtime: Arc<RuntimeContext>,
    depth: usize,
    recorder: Recorder,
    cancel: CancellationToken,
    status_interval: Duration,
}

struct Outcome {
    state: TaskState,
    error: Option<String>,
}

impl Outcome {
    fn done() -> Self {
        Self {
            state: TaskState::Done,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            state: TaskState::Failed,
            error: Some(error.into()),
        }
    }

    fn cancelled() -> Self {
        Self {
            state: TaskState::Cancelled,
            error: None,
        }
    }
}

impl Worker {
    async fn run(self, job: BackgroundJob) -> TaskState {
        let start = match &job {
            BackgroundJob::Agent(request) => json!({
                "kind": "agent",
                "agent": request.agent_name,
                "prompt": request.prompt,
            }),
            BackgroundJob::Command { command, .. } => json!({
                "kind": "command",
                "command": command,
            }),
        };
        self.recorder.record(event_type::START, start);
        self.recorder.write_status();

        let work = self.execute(job);
        tokio::pin!(work);
        let mut ticker = tokio::time::interval(self.status_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let outcome = loop {
            tokio::select! {
                outcome = &mut work => break outcome,
                _ = ticker.tick() => self.recorder.write_status(),
            }
        };

        self.recorder.finish(outcome)
    }

    async fn execute(&self, job: BackgroundJob) -> Outcome {
        match job {
            BackgroundJob::Agent(request) => self.run_agent(request).await,
            BackgroundJob::Command { command, timeout } => {
                self.run_command(&command, timeout).await
            }
        }
    }

    async fn run_agent(&self, request: SubagentRequest) -> Outcome {
        let chunks = self.recorder.clone();
        let on_chunk: ChunkCallback = Arc::new(move |chunk: &Chunk| chunks.chunk(chunk));
        let tools = self.recorder.clone();
        let on_tool_done: ToolDoneCallback =
            Arc::new(move |call: &ToolCall, result: &ToolResult| tools.tool_done(call, result));

        let result = SubagentExecutor::new(self.runtime.clone())
            .with_depth(self.depth)
            .on_chunk(on_chunk)
            .on_tool_done(on_tool_done)
            .run(request, self.cancel.clone())
            .await;

        if result.success {
            Outcome::done()
        } else if self.cancel.is_cancelled() {
            Outcome::cancelled()
        } else {
            Outcome::failed(result.error.unwrap_or_else(|| "agent failed".to_string()))
        }
    }

    async fn run_command(&self, command: &str, timeout: Option<Duration>) -> Outcome {
        let mut cmd = shell_command(command, &self.runtime.working_dir);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return Outcome::failed(format!("failed to start command: {e}")),
        };

        let stdout = pump(child.stdout.take(), "stdout", self.recorder.clone());
        let stderr = pump(child.stderr.take(), "stderr", self.recorder.clone());
        let finished = async {
            let (status, (), ()) = tokio::join!(child.wait(), stdout, stderr);
            status
        };
        let deadline = async {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };

        // Dropping `child` on the early branches kills the process.
        tokio::select! {
            status = finished => match status {
                Ok(status) if status.success() => Outcome::done(),
                Ok(status) => Outcome::failed(format!(
                    "command exited with code {}",
                    status.code().unwrap_or(-1)
                )),
                Err(e) => Outcome::failed(e.to_string()),
            },
            _ = self.cancel.cancelled() => Outcome::cancelled(),
            _ = deadline => Outcome::failed(format!(
                "command timed out after {:.1}s",
                timeout.unwrap_or_default().as_secs_f64()
            )),
        }
    }
}

/// Largest `output` event; longer lines are split across several events.
const MAX_OUTPUT_EVENT_BYTES: usize = 8 * 1024;

/// Forward `reader` as `output` events, one per line or per
/// `MAX_OUTPUT_EVENT_BYTES`, whichever is shorter. Invalid UTF-8 is replaced.
async fn pump<R>(reader: Option<R>, stream: &'static str, recorder: Recorder)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut reader = BufReader::new(reader);
    let mut pending: Vec<u8> = Vec::with_capacity(MAX_OUTPUT_EVENT_BYTES);

    loop {
        let available = match reader.fill_buf().await {
            Ok(available) => available,
            Err(e) => {
                tracing::warn!(stream, error = %e, "failed to read command output");
                break;
            }
        };
        if available.is_empty() {
            break;
        }

        let room = MAX_OUTPUT_EVENT_BYTES - pending.len();
        let take = match available.iter().take(room).position(|b| *b == b'\n') {
            Some(pos) => pos + 1,
            None => available.len().min(room),
        };
        pending.extend_from_slice(&available[..take]);
        reader.consume(take);

        if pending.ends_with(b"\n") {
            record_output(&recorder, stream, &pending);
            pending.clear();
        } else if pending.len() >= MAX_OUTPUT_EVENT_BYTES {
            // Keep a trailing partial character for the next event.
            let cut = utf8_boundary(&pending);
            record_output(&recorder, stream, &pending[..cut]);
            pending.drain(..cut);
        }

        if recorder.is_capped() {
            return;
        }
    }

    if !pending.is_empty() {
        record_output(&recorder, stream, &pending);
    }
}

fn record_output(recorder: &Recorder, stream: &str, bytes: &[u8]) {
    recorder.record(
        event_type::OUTPUT,
        json!({"text": String::from_utf8_lossy(bytes), "stream": stream}),
    );
}

/// Length of `bytes` without an incomplete UTF-8 sequence at the end.
fn utf8_boundary(bytes: &[u8]) -> usize {
    match std::str::from_utf8(bytes) {
        Err(e) if e.error_len().is_none() && e.valid_up_to() > 0 => e.valid_up_to(),
        _ => bytes.len(),
    }
}

/// Serialized writer of one task's log and status.
#[derive(Clone)]
struct Recorder {
    inner: Arc<Mutex<RecorderState>>,
}

struct RecorderState {
    log: TaskLog,
    max_output_bytes: u64,
    capped: bool,
    tool_count: Option<usize>,
    cancel: CancellationToken,
}

impl Recorder {
    fn new(log: TaskLog, max_output_bytes: u64, cancel: CancellationToken) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RecorderState {
                log,
                max_output_bytes,
                capped: false,
                tool_count: None,
                cancel,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RecorderState> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn record(&self, kind: &str, data: serde_json::Value) {
        self.lock().append(TaskEvent::new(kind, data));
    }

    fn is_capped(&self) -> bool {
        self.lock().capped
    }

    fn chunk(&self, chunk: &Chunk) {
        match chunk {
            Chunk::Text { delta } => self.record(event_type::TEXT, json!({"text": delta})),
            Chunk::Thinking { delta } => self.record(event_type::THINKING, json!({"text": delta})),
            Chunk::ToolStart { id, name } => {
                self.record(event_type::TOOL_CALL, json!({"id": id, "name": name}))
            }
            _ => {}
        }
    }

    fn tool_done(&self, call: &ToolCall, result: &ToolResult) {
        let mut state = self.lock();
        state.tool_count = Some(state.tool_count.unwrap_or(0) + 1);
        state.append(TaskEvent::new(
            event_type::TOOL_RESULT,
            json!({
                "id": call.id,
                "name": call.name,
                "output": result.output,
                "is_error": result.is_error,
            }),
        ));
        state.write_status(TaskState::Running, None);
    }

    fn write_status(&self) {
        self.lock().write_status(TaskState::Running, None);
    }

    /// Record the terminal state. A task that hit the output cap always
    /// ends as failed and gets no `end` event.
    fn finish(&self, outcome: Outcome) -> TaskState {
        let mut state = self.lock();
        let (status, error) = if state.capped {
            (
                TaskState::Failed,
                Some(format!(
                    "output limit of {} bytes exceeded",
                    state.max_output_bytes
                )),
            )
        } else {
            (outcome.state, outcome.error)
        };

        let mut end = json!({"status": status});
        if let Some(error) = &error {
            end["error"] = json!(error);
        }
        state.append(TaskEvent::new(event_type::END, end));
        state.write_status(status, error.clone());

        let task_id = state.log.id().to_string();
        match &error {
            Some(error) => tracing::warn!(%task_id, %status, %error, "background task finished"),
            None => tracing::info!(%task_id, %status, "background task finished"),
        }
        status
    }
}

impl RecorderState {
    fn append(&mut self, event: TaskEvent) {
        if self.capped {
            return;
        }
        let line = match event.to_line() {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "dropping unserializable task event");
                return;
            }
        };

        if self.log.bytes_written() + line.len() as u64 > self.max_output_bytes {
            self.capped = true;
            self.cancel.cancel();
            let marker = TaskEvent::new(
                event_type::ERROR,
                json!({"message": format!(
                    "output limit of {} bytes exceeded; task stopped",
                    self.max_output_bytes
                )}),
            );
            let written = marker
                .to_line()
                .map_err(StoreError::from)
                .and_then(|line| self.log.append_line(&line));
            if let Err(e) = written {
                tracing::warn!(task_id = %self.log.id(), error = %e, "failed to write output limit marker");
            }
            return;
        }

        if let Err(e) = self.log.append_line(&line) {
            tracing::warn!(task_id = %self.log.id(), error = %e, "failed to append task event");
        }
    }

    fn write_status(&self, status: TaskState, error: Option<String>) {
        let record = TaskStatusRecord {
            status,
            tool_count: self.tool_count,
            error,
            bytes_written: self.log.bytes_written(),
        };
        if let Err(e) = self.log.write_status(&record) {
            tracing::warn!(task_id = %self.log.id(), error = %e, "failed to write task status");
        }
    }
}
