//! Direct shell execution shared by the `bash` tool and background command jobs.

use crate::error::ToolError;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Captured output of a finished shell command.
#[derive(Debug, Clone)]
pub struct ShellOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
    pub success: bool,
}

/// Build a shell invocation of `command` in `cwd`.
///
/// The child is killed when its handle is dropped, so abandoning the future
/// that owns it (timeout, cancellation) never leaks a process.
pub fn shell_command(command: &str, cwd: &Path) -> Command {
    let (shell, flag) = shell_and_flag();
    let mut cmd = Command::new(shell);
    cmd.arg(flag)
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    cmd
}

/// Run `command` to completion, bounded by `timeout` and `cancel`.
pub async fn run_shell(
    command: &str,
    cwd: &Path,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ShellOutput, ToolError> {
    let mut cmd = shell_command(command, cwd);
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let output = tokio::select! {
        result = tokio::time::timeout(timeout, cmd.output()) => result
            .map_err(|_| ToolError::Timeout(format!("Command timed out after {}s", timeout.as_secs())))?
            .map_err(|e| ToolError::ExecutionError(e.to_string()))?,
        _ = cancel.cancelled() => return Err(ToolError::Cancelled),
    };

    Ok(ShellOutput {
        stdout: output.stdout,
        stderr: output.stderr,
        exit_code: output.status.code().unwrap_or(-1),
        success: output.status.success(),
    })
}

fn shell_and_flag() -> (&'static str, &'static str) {
    if cfg!(target_os = "windows") {
        ("cmd", "/C")
    } else {
        ("/bin/sh", "-c")
    }
}
