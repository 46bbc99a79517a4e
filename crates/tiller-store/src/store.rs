//! Background task store: one directory per task under a common root.

use crate::error::StoreError;
use crate::format::{
    event_type, TaskEvent, TaskMeta, TaskStatusRecord, EVENTS_FILE, META_FILE, STATUS_FILE,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Append handle on one task's event log, owned by the task's worker.
///
/// Writes are synchronous so they can happen from inside stream observers.
#[derive(Debug)]
pub struct TaskLog {
    id: String,
    dir: PathBuf,
    events: std::fs::File,
    bytes_written: u64,
}

impl TaskLog {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Bytes in the event log, including those written before this handle
    /// was opened.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Append one event, returning the number of bytes written.
    pub fn append(&mut self, event: &TaskEvent) -> Result<u64, StoreError> {
        let line = event.to_line()?;
        self.append_line(&line)
    }

    /// Append a pre-serialized line. `line` must end with a newline.
    pub fn append_line(&mut self, line: &str) -> Result<u64, StoreError> {
        debug_assert!(line.ends_with('\n'));
        self.events.write_all(line.as_bytes())?;
        self.events.flush()?;
        let len = line.len() as u64;
        self.bytes_written += len;
        Ok(len)
    }

    /// Replace `status.json` atomically.
    pub fn write_status(&self, record: &TaskStatusRecord) -> Result<(), StoreError> {
        let json = serde_json::to_vec(record)?;
        write_atomic(&self.dir.join(STATUS_FILE), &json)
    }
}

/// Everything recoverable about a task from disk.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub meta: TaskMeta,
    pub status: TaskStatusRecord,
    pub events: Vec<TaskEvent>,
}

impl TaskSnapshot {
    /// Concatenated text of the task, from `text` and `output` events.
    pub fn output_text(&self) -> String {
        self.events
            .iter()
            .filter(|e| e.kind == event_type::TEXT || e.kind == event_type::OUTPUT)
            .filter_map(|e| e.data.get("text").and_then(|t| t.as_str()))
            .collect()
    }
}

/// A task as shown in listings.
#[derive(Debug, Clone)]
pub struct TaskSummary {
    pub meta: TaskMeta,
    pub status: Option<TaskStatusRecord>,
}

/// Events read past an offset, with the offset to resume from.
#[derive(Debug, Clone, Default)]
pub struct EventBatch {
    pub events: Vec<TaskEvent>,
    pub next_offset: u64,
}

/// Persistent background task storage.
#[derive(Debug, Clone)]
pub struct TaskStore {
    tasks_dir: PathBuf,
}

impl TaskStore {
    /// Create a store under `~/.local/share/tiller/tasks/` (platform data dir).
    pub fn new() -> Self {
        let base = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tiller")
            .join("tasks");
        Self { tasks_dir: base }
    }

    /// Create with a custom directory (for testing).
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            tasks_dir: dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.tasks_dir
    }

    /// Fresh, lexicographically time-ordered task id.
    pub fn new_task_id() -> String {
        ulid::Ulid::new().to_string()
    }

    pub fn task_dir(&self, id: &str) -> PathBuf {
        self.tasks_dir.join(id)
    }

    /// Create the task directory, write its metadata and an initial
    /// `running` status, and return the log handle.
    pub fn create(&self, meta: &TaskMeta) -> Result<TaskLog, StoreError> {
        let dir = self.task_dir(&meta.id);
        if dir.join(META_FILE).exists() {
            return Err(StoreError::InvalidFormat(format!(
                "task {} already exists",
                meta.id
            )));
        }
        std::fs::create_dir_all(&dir)?;
        write_atomic(&dir.join(META_FILE), &serde_json::to_vec_pretty(meta)?)?;

        let log = self.open(&meta.id)?;
        log.write_status(&TaskStatusRecord::running())?;
        tracing::debug!(task_id = %meta.id, dir = %dir.display(), "created task");
        Ok(log)
    }

    /// Open an existing task's log for appending.
    pub fn open(&self, id: &str) -> Result<TaskLog, StoreError> {
        let dir = self.task_dir(id);
        if !dir.join(META_FILE).exists() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let events = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(EVENTS_FILE))?;
        let bytes_written = events.metadata()?.len();
        Ok(TaskLog {
            id: id.to_string(),
            dir,
            events,
            bytes_written,
        })
    }

    pub async fn read_meta(&self, id: &str) -> Result<TaskMeta, StoreError> {
        let path = self.task_dir(id).join(META_FILE);
        let content = read_existing(&path, id).await?;
        Ok(serde_json::from_str(&content)?)
    }

    pub async fn read_status(&self, id: &str) -> Result<TaskStatusRecord, StoreError> {
        let path = self.task_dir(id).join(STATUS_FILE);
        let content = read_existing(&path, id).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Recover a task: status record plus the full log replayed from offset 0.
    pub async fn load(&self, id: &str) -> Result<TaskSnapshot, StoreError> {
        let meta = self.read_meta(id).await?;
        let status = self.read_status(id).await?;
        let batch = self.read_events_from(id, 0).await?;
        Ok(TaskSnapshot {
            meta,
            status,
            events: batch.events,
        })
    }

    /// Read complete events starting at byte `offset`.
    ///
    /// A trailing line without its newline is still being written; it is
    /// left for the next call and `next_offset` points at its start.
    pub async fn read_events_from(&self, id: &str, offset: u64) -> Result<EventBatch, StoreError> {
        let dir = self.task_dir(id);
        if !dir.join(META_FILE).exists() {
            return Err(StoreError::NotFound(id.to_string()));
        }

        let path = dir.join(EVENTS_FILE);
        let mut file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(EventBatch {
                    events: Vec::new(),
                    next_offset: offset,
                })
            }
            Err(e) => return Err(e.into()),
        };
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;

        let complete = buf.iter().rposition(|b| *b == b'\n').map_or(0, |pos| pos + 1);
        let mut events = Vec::new();
        for (line_num, line) in buf[..complete].split(|b| *b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<TaskEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!(task_id = id, line = line_num + 1, error = %e, "skipping malformed event line"),
            }
        }

        Ok(EventBatch {
            events,
            next_offset: offset + complete as u64,
        })
    }

    /// All tasks, newest first.
    pub async fn list(&self) -> Result<Vec<TaskSummary>, StoreError> {
        if !self.tasks_dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.tasks_dir).await?;
        let mut tasks = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            let Ok(meta) = self.read_meta(&id).await else {
                continue;
            };
            let status = self.read_status(&id).await.ok();
            tasks.push(TaskSummary { meta, status });
        }

        tasks.sort_by(|a, b| {
            b.meta
                .created_at
                .cmp(&a.meta.created_at)
                .then_with(|| b.meta.id.cmp(&a.meta.id))
        });
        Ok(tasks)
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_existing(path: &Path, id: &str) -> Result<String, StoreError> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(StoreError::NotFound(id.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Write via a sibling temp file and rename, so readers never see a torn file.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
