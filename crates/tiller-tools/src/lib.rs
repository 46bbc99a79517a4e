//! tiller-tools: the tool contract and built-in tools (read, glob, grep, bash, task).

pub mod builtin;
mod error;
mod path_guard;
pub mod registry;
pub mod shell;
pub mod traits;

pub use builtin::{builtin_registry, register_all};
pub use error::ToolError;
pub use registry::ToolRegistry;
pub use traits::{TaskExecution, TaskRequest, TaskRunner, Tool, ToolContext, ToolResult};
