//! tiller-store: on-disk contract of background tasks (NDJSON event log,
//! status record, metadata record) and replay.

mod error;
pub mod format;
pub mod store;

pub use error::StoreError;
pub use format::{
    event_type, now_millis, TaskEvent, TaskKind, TaskMeta, TaskState, TaskStatusRecord,
};
pub use store::{EventBatch, TaskLog, TaskSnapshot, TaskStore, TaskSummary};
