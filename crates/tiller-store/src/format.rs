//! On-disk record types for background tasks.
//!
//! A task directory holds three files:
//!
//! - `events.ndjson`: one [`TaskEvent`] per line, append-only.
//! - `status.json`: the latest [`TaskStatusRecord`], rewritten in place.
//! - `meta.json`: the [`TaskMeta`] written once at creation.
//!
//! External processes read these files directly, so field names and order
//! are part of the contract.

use serde::{Deserialize, Serialize};
use std::fmt;

/// File name of the event log inside a task directory.
pub const EVENTS_FILE: &str = "events.ndjson";
/// File name of the status record inside a task directory.
pub const STATUS_FILE: &str = "status.json";
/// File name of the metadata record inside a task directory.
pub const META_FILE: &str = "meta.json";

/// Event type names written to the log.
pub mod event_type {
    pub const START: &str = "start";
    pub const TEXT: &str = "text";
    pub const THINKING: &str = "thinking";
    pub const TOOL_CALL: &str = "tool_call";
    pub const TOOL_RESULT: &str = "tool_result";
    pub const OUTPUT: &str = "output";
    pub const ERROR: &str = "error";
    pub const END: &str = "end";
}

/// One line of `events.ndjson`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Unix time in milliseconds.
    pub timestamp: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
}

impl TaskEvent {
    /// Event stamped with the current time.
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            timestamp: now_millis(),
            kind: kind.into(),
            data,
        }
    }

    /// Serialized NDJSON line, including the trailing newline.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Lifecycle state of a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Running,
    Done,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskState::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Running => "running",
            TaskState::Done => "done",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contents of `status.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusRecord {
    pub status: TaskState,
    /// Completed tool calls; absent for command jobs.
    #[serde(rename = "toolCount", default, skip_serializing_if = "Option::is_none")]
    pub tool_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Bytes appended to the event log so far.
    #[serde(rename = "bytesWritten")]
    pub bytes_written: u64,
}

impl TaskStatusRecord {
    pub fn running() -> Self {
        Self {
            status: TaskState::Running,
            tool_count: None,
            error: None,
            bytes_written: 0,
        }
    }
}

/// What a background task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Agent,
    Command,
}

/// Contents of `meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMeta {
    pub id: String,
    pub kind: TaskKind,
    /// Agent name or command line.
    pub label: String,
    /// Unix time in milliseconds.
    pub created_at: u64,
    pub cwd: String,
}

/// Current Unix time in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_line_shape() {
        let event = TaskEvent {
            timestamp: 1_700_000_000_000,
            kind: event_type::TOOL_CALL.to_string(),
            data: serde_json::json!({"name": "read"}),
        };
        assert_eq!(
            event.to_line().unwrap(),
            "{\"timestamp\":1700000000000,\"type\":\"tool_call\",\"data\":{\"name\":\"read\"}}\n"
        );
    }

    #[test]
    fn test_status_record_shape() {
        let running = TaskStatusRecord::running();
        assert_eq!(
            serde_json::to_string(&running).unwrap(),
            r#"{"status":"running","bytesWritten":0}"#
        );

        let failed = TaskStatusRecord {
            status: TaskState::Failed,
            tool_count: Some(2),
            error: Some("output limit exceeded".to_string()),
            bytes_written: 512,
        };
        assert_eq!(
            serde_json::to_string(&failed).unwrap(),
            r#"{"status":"failed","toolCount":2,"error":"output limit exceeded","bytesWritten":512}"#
        );
    }

    #[test]
    fn test_status_record_reads_minimal_json() {
        let record: TaskStatusRecord =
            serde_json::from_str(r#"{"status":"done","bytesWritten":10}"#).unwrap();
        assert_eq!(record.status, TaskState::Done);
        assert!(record.status.is_terminal());
        assert_eq!(record.tool_count, None);
    }
}
