//! tiller: agent execution engine for coding assistants.
//!
//! Runs one-shot agent turns in the terminal and manages background tasks
//! whose state lives on disk.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands, TaskAction};
use commands::exec::{ExecExitError, ExecOptions};
use commands::ProviderArgs;
use tiller_core::ConfigStore;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = ConfigStore::new().load();
    ConfigStore::hydrate_env(&config);
    let provider_args = ProviderArgs {
        provider: cli.provider.clone(),
        model: cli.model.clone(),
    };

    let mut machine_output = false;
    let result = match cli.command {
        Commands::Exec {
            prompt,
            agent,
            max_turns,
            permission,
            json,
        } => {
            machine_output = json;
            if let Some(preset) = permission {
                config.permissions.policy = preset;
            }
            let runtime = commands::build_runtime(config, &provider_args)?;
            let options = ExecOptions {
                agent,
                max_turns,
                json,
            };
            commands::exec::run(runtime, &prompt, options).await
        }
        Commands::Task { action } => run_task(action, config, &provider_args).await,
        Commands::Tools { name } => {
            let timeout = config.tool_timeout();
            commands::tools::run(&tiller_tools::builtin_registry(), name.as_deref(), timeout)
        }
        Commands::Agents => {
            commands::agents::run();
            Ok(())
        }
    };

    if let Err(err) = result {
        if let Some(exit_err) = err.downcast_ref::<ExecExitError>() {
            if !machine_output {
                eprintln!("{}", exit_err.message);
            }
            std::process::exit(exit_err.code);
        }
        return Err(err);
    }

    Ok(())
}

async fn run_task(
    action: TaskAction,
    config: tiller_core::Config,
    provider_args: &ProviderArgs,
) -> anyhow::Result<()> {
    match action {
        TaskAction::Start {
            prompt,
            agent,
            command,
            timeout_secs,
        } => {
            let job = commands::task::job_from_args(agent, prompt, command, timeout_secs)?;
            let runtime = commands::build_runtime(config, provider_args)?;
            commands::task::start(&runtime, provider_args, job)
        }
        TaskAction::List => commands::task::list(&tiller_store::TaskStore::new()).await,
        TaskAction::Show { id } => commands::task::show(&tiller_store::TaskStore::new(), &id).await,
        TaskAction::Log { id, follow } => {
            commands::task::log(&tiller_store::TaskStore::new(), &id, follow).await
        }
        TaskAction::Worker {
            id,
            agent,
            prompt,
            command,
            timeout_secs,
        } => {
            let job = commands::task::job_from_args(agent, prompt, command, timeout_secs)?;
            let runtime = commands::build_runtime(config, provider_args)?;
            commands::task::worker(runtime, &id, job).await
        }
    }
}

/// Logs go to stderr so stdout stays clean for `--json`.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("tiller=debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
