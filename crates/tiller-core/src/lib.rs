//! tiller-core: the agent execution engine.
//!
//! Turn loop, permission gate, token budget and compaction, subagents and
//! background tasks, plus the message and configuration types they share.

pub mod agent;
pub mod agent_profile;
pub mod agent_registry;
pub mod background;
pub mod compaction;
pub mod config;
pub mod context;
mod dispatch;
mod error;
pub mod message;
pub mod permission;
pub mod subagent;
pub mod turn;

pub use agent::{
    Agent, AgentConfig, ChunkCallback, RunOptions, RunResult, RunStopReason, DEFAULT_MAX_TURNS,
};
pub use agent_profile::{AgentMode, AgentProfile};
pub use agent_registry::AgentRegistry;
pub use background::{BackgroundJob, BackgroundTaskManager, TaskHandle};
pub use compaction::{needs_compaction, CompactionOutcome, Compactor};
pub use config::{
    BackgroundSettings, CompactionSettings, Config, ConfigStore, PermissionSettings,
    SubagentSettings,
};
pub use context::RuntimeContext;
pub use dispatch::ToolDoneCallback;
pub use error::{CompactionError, TillerError, TurnError};
pub use message::{ContentBlock, Message, MessageId, Role, ToolCall};
pub use permission::{
    ApprovalAction, ApprovalCache, ConfirmCallback, ConfirmRequest, Decision, PermissionGate,
    PermissionPolicy, PermissionRule, PolicyPreset, RuleAction, RuleSet,
};
pub use subagent::{AgentResult, SubagentExecutor, SubagentRequest};
pub use turn::{collect_turn, TurnResult};
