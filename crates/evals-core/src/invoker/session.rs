//! Scoped assistant process.
//!
//! [`AssistantSession`] owns the child process for the lifetime of one
//! invocation. On Unix the child leads its own process group so that
//! termination reaches every descendant (shells, test runners) the assistant
//! started. Termination is graceful first (`SIGTERM` to the group), forceful
//! after the grace period (`SIGKILL` to the group plus a direct kill of the
//! leader), and `Drop` force-kills anything still running so no exit path
//! can leak a process.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, warn};

use crate::config::AssistantCommand;
use crate::domain::{EvalError, Result};

#[cfg(target_os = "linux")]
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A running assistant process.
#[derive(Debug)]
pub struct AssistantSession {
    child: Child,
    pid: Option<u32>,
    program: String,
    exited: bool,
}

impl AssistantSession {
    /// Start the assistant rooted at `workspace` with `instruction`.
    pub fn spawn(
        command: &AssistantCommand,
        instruction: &str,
        workspace: &Path,
    ) -> Result<(Self, ChildStdout, ChildStderr)> {
        let mut cmd = Command::new(&command.program);
        cmd.args(command.render_args(instruction))
            .envs(&command.env)
            .current_dir(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|e| EvalError::Spawn {
            program: command.program.clone(),
            reason: e.to_string(),
        })?;

        let stdout = child.stdout.take().ok_or_else(|| EvalError::Spawn {
            program: command.program.clone(),
            reason: "stdout was not captured".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| EvalError::Spawn {
            program: command.program.clone(),
            reason: "stderr was not captured".to_string(),
        })?;

        let pid = child.id();
        debug!(program = %command.program, pid = ?pid, "assistant process started");
        Ok((
            Self {
                child,
                pid,
                program: command.program.clone(),
                exited: false,
            },
            stdout,
            stderr,
        ))
    }

    /// Wait for the process to exit on its own, then clear out any
    /// descendants it left behind.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.leader_exited().await;
        self.signal_group("KILL").await;
        let status = self.child.wait().await?;
        self.exited = true;
        Ok(status)
    }

    /// Stop the process: graceful request, then force after `grace`.
    ///
    /// Returns the exit status if the process was reaped.
    pub async fn terminate(&mut self, grace: Duration) -> Option<ExitStatus> {
        if self.exited {
            return None;
        }

        self.signal_group("TERM").await;
        let stopped = tokio::time::timeout(grace, self.leader_exited()).await.is_ok();
        if stopped {
            debug!(program = %self.program, "assistant stopped gracefully");
        } else {
            warn!(
                program = %self.program,
                grace_ms = grace.as_millis() as u64,
                "assistant ignored SIGTERM, force killing"
            );
        }

        self.signal_group("KILL").await;
        if !stopped {
            if let Err(e) = self.child.start_kill() {
                debug!(program = %self.program, error = %e, "start_kill failed");
            }
        }
        match self.child.wait().await {
            Ok(status) => {
                self.exited = true;
                Some(status)
            }
            Err(e) => {
                warn!(program = %self.program, error = %e, "failed to reap assistant process");
                None
            }
        }
    }

    /// Resolves once the group leader has exited, without reaping it.
    ///
    /// An unreaped leader keeps its pid, and with it the process group id,
    /// reserved, so group signals sent afterwards cannot reach a recycled
    /// group.
    #[cfg(target_os = "linux")]
    async fn leader_exited(&mut self) {
        let Some(pid) = self.pid else { return };
        let stat_path = format!("/proc/{pid}/stat");
        loop {
            match tokio::fs::read_to_string(&stat_path).await {
                Ok(stat) if !is_zombie(&stat) => tokio::time::sleep(EXIT_POLL_INTERVAL).await,
                _ => return,
            }
        }
    }

    /// Without procfs the leader is reaped here; a later group signal relies
    /// on its pid not having been reused in between.
    #[cfg(not(target_os = "linux"))]
    async fn leader_exited(&mut self) {
        let _ = self.child.wait().await;
    }

    #[cfg(unix)]
    async fn signal_group(&self, signal: &str) {
        let Some(pid) = self.pid else { return };
        let result = Command::new("kill")
            .arg(format!("-{signal}"))
            .arg("--")
            .arg(format!("-{pid}"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = result {
            debug!(pid, signal, error = %e, "failed to signal process group");
        }
    }

    #[cfg(not(unix))]
    async fn signal_group(&self, _signal: &str) {}
}

impl Drop for AssistantSession {
    fn drop(&mut self) {
        if self.exited {
            return;
        }
        #[cfg(unix)]
        {
            if let Some(pid) = self.pid {
                let _ = std::process::Command::new("kill")
                    .arg("-KILL")
                    .arg("--")
                    .arg(format!("-{pid}"))
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status();
            }
        }
        let _ = self.child.start_kill();
    }
}

/// `/proc/<pid>/stat` reports a zombie (exited, not yet reaped) or dead task.
#[cfg(target_os = "linux")]
fn is_zombie(stat: &str) -> bool {
    // Format: `pid (comm) state ...`; comm may contain spaces and parens.
    let state = stat
        .rsplit_once(')')
        .and_then(|(_, rest)| rest.split_whitespace().next());
    matches!(state, Some("Z") | Some("X"))
}
