//! CLI argument and command definitions.

use clap::{Parser, Subcommand};
use tiller_core::PolicyPreset;

#[derive(Parser)]
#[command(name = "tiller", version, about = "tiller - agent execution engine for coding assistants")]
pub struct Cli {
    /// LLM provider to use (defaults to the configured provider).
    #[arg(long, global = true)]
    pub provider: Option<String>,

    /// Model to use (defaults to the configured or provider's default model).
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a single prompt and exit.
    Exec {
        /// The prompt to execute.
        prompt: String,

        /// Agent profile to run.
        #[arg(long)]
        agent: Option<String>,

        /// Maximum provider turns before giving up.
        #[arg(long)]
        max_turns: Option<usize>,

        /// Permission preset: permit-all, read-only, deny-all or rules.
        #[arg(long)]
        permission: Option<PolicyPreset>,

        /// Stream NDJSON events to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Manage background tasks.
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// List the available tools, or show one tool's schema.
    Tools {
        /// Tool name.
        name: Option<String>,
    },

    /// List the built-in agent profiles.
    Agents,
}

#[derive(Subcommand)]
pub enum TaskAction {
    /// Start a background task in a detached worker process.
    Start {
        /// Prompt for a subagent task.
        #[arg(required_unless_present = "command")]
        prompt: Option<String>,

        /// Subagent profile for the prompt.
        #[arg(long, conflicts_with = "command")]
        agent: Option<String>,

        /// Run a shell command instead of a subagent.
        #[arg(long, conflicts_with = "prompt")]
        command: Option<String>,

        /// Kill the command after this many seconds.
        #[arg(long, requires = "command")]
        timeout_secs: Option<u64>,
    },

    /// List background tasks, newest first.
    List,

    /// Show a task's status and collected output.
    Show {
        /// Task ID.
        id: String,
    },

    /// Print a task's event log.
    Log {
        /// Task ID.
        id: String,

        /// Keep printing new events until the task finishes.
        #[arg(short, long)]
        follow: bool,
    },

    /// Run an already created task in this process.
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        id: String,

        #[arg(long)]
        agent: Option<String>,

        #[arg(long)]
        prompt: Option<String>,

        #[arg(long)]
        command: Option<String>,

        #[arg(long)]
        timeout_secs: Option<u64>,
    },
}
