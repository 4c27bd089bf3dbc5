use std::{fs::File, path::Path, process::Stdio, time::Duration};

use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use been_model::{TaskDescriptor, TaskId};

use crate::{AgentError, RlimitConfig, attach_rlimits};

/// How a supervised process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Exited on its own. `code` is `None` when a signal ended it.
    Exited { code: Option<i32> },
    /// Terminated because its cancellation token fired.
    Killed,
    /// The exit status could not be collected.
    WaitFailed(String),
}

/// Spawn the task's program inside `dir`.
///
/// stdout and stderr go to `stdout.log` and `stderr.log` next to the task's
/// files; stdin is closed.
pub(crate) fn spawn(
    task_id: &TaskId,
    descriptor: &TaskDescriptor,
    dir: &Path,
    env: &[(&str, &str)],
    limits: &RlimitConfig,
) -> Result<Child, AgentError> {
    if descriptor.program.trim().is_empty() {
        return Err(AgentError::MissingProgram(task_id.clone()));
    }
    let log_file = |name: &str| {
        let path = dir.join(name);
        File::create(&path).map_err(|source| AgentError::WorkDir { path, source })
    };

    let mut cmd = Command::new(&descriptor.program);
    cmd.args(&descriptor.args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(log_file("stdout.log")?)
        .stderr(log_file("stderr.log")?)
        .kill_on_drop(true);
    for kv in descriptor.env.iter() {
        cmd.env(kv.key(), kv.value());
    }
    for (k, v) in env {
        cmd.env(k, v);
    }
    attach_rlimits(&mut cmd, limits);

    cmd.spawn().map_err(|source| AgentError::Spawn {
        program: descriptor.program.clone(),
        source,
    })
}

/// Wait for `child` to exit, or terminate it once `cancel` fires.
pub async fn supervise(
    mut child: Child,
    cancel: CancellationToken,
    grace: Duration,
) -> ProcessOutcome {
    tokio::select! {
        status = child.wait() => match status {
            Ok(status) => ProcessOutcome::Exited { code: status.code() },
            Err(e) => ProcessOutcome::WaitFailed(format!("wait: {e}")),
        },
        _ = cancel.cancelled() => {
            debug!(pid = ?child.id(), "cancelled, terminating child");
            if let Err(e) = kill_graceful(&mut child, grace).await {
                return ProcessOutcome::WaitFailed(format!("kill: {e}"));
            }
            ProcessOutcome::Killed
        }
    }
}

/// SIGTERM, then SIGKILL if the child is still around after `grace`.
#[cfg(unix)]
pub async fn kill_graceful(child: &mut Child, grace: Duration) -> std::io::Result<()> {
    if let Some(pid) = child.id() {
        // SAFETY: plain syscall on a pid we own and have not reaped yet.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
        if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
            return status.map(|_| ());
        }
    }
    child.kill().await
}

#[cfg(not(unix))]
pub async fn kill_graceful(child: &mut Child, _grace: Duration) -> std::io::Result<()> {
    child.kill().await
}
