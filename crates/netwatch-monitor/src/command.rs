//! Running external measurement tools under the execution deadline.

use std::process::Stdio;

use netwatch_scheduler::ExecutionContext;
use tokio::process::Command;
use tracing::debug;

use crate::error::{MonitorError, Result};
use crate::truncate::{truncate_middle, MAX_STDERR_CHARS};

/// Captured result of a finished process. A non-zero exit is not an error
/// at this level; some tools (ping) report partial results that way.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub program: String,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Stdout of a successful run, or [`MonitorError::Failed`] with
    /// truncated stderr.
    pub fn into_stdout(self) -> Result<String> {
        if self.success() {
            return Ok(self.stdout);
        }
        Err(self.into_failure())
    }

    pub fn into_failure(self) -> MonitorError {
        let stderr = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        MonitorError::Failed {
            code: self.code,
            stderr: truncate_middle(stderr, MAX_STDERR_CHARS),
            program: self.program,
        }
    }
}

/// Spawn `program args...` and wait for it, racing the child against the
/// context's deadline and cancellation token.
///
/// The child is spawned with `kill_on_drop`, so losing the race kills it.
///
/// # Errors
///
/// - `NotFound` / `Spawn`: the process could not be started.
/// - `Timeout`: the deadline passed first.
/// - `Cancelled`: the token fired first.
pub async fn run_command(
    program: &str,
    args: &[String],
    ctx: &ExecutionContext,
) -> Result<CommandOutput> {
    debug!(job_id = %ctx.job_id, program, ?args, "spawning measurement tool");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => MonitorError::NotFound {
                program: program.to_string(),
            },
            _ => MonitorError::Spawn {
                program: program.to_string(),
                source: e,
            },
        })?;

    let budget_ms = ctx.remaining().as_millis() as u64;

    let output = tokio::select! {
        output = child.wait_with_output() => output.map_err(|e| MonitorError::Spawn {
            program: program.to_string(),
            source: e,
        })?,
        _ = tokio::time::sleep_until(ctx.deadline) => {
            return Err(MonitorError::Timeout {
                program: program.to_string(),
                ms: budget_ms,
            });
        }
        _ = ctx.cancel.cancelled() => return Err(MonitorError::Cancelled),
    };

    let result = CommandOutput {
        program: program.to_string(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    debug!(job_id = %ctx.job_id, program, code = ?result.code, "measurement tool exited");
    Ok(result)
}
