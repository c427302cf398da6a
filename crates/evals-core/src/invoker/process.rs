//! Assistant invocation over a child process.
//!
//! The assistant's stdout is read line by line and fed to a
//! [`TranscriptParser`] while the caller's deadline and cancellation token are
//! watched concurrently. The loop ends when the assistant reports completion,
//! closes its output, produces a malformed line, or the context fires. In
//! every case the process group is stopped before `invoke` returns.

use std::path::Path;
use std::process::ExitStatus;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::context::InvokeContext;
use super::session::AssistantSession;
use super::transcript::{Transcript, TranscriptParser};
use crate::config::{AssistantCommand, EvalConfig};
use crate::domain::{EvalError, Result, RunResult, RunStatus, RunTiming};
use crate::metrics::METRICS;
use crate::obs;

/// Runs the assistant against a workspace with a single instruction.
#[async_trait]
pub trait Invoker: Send + Sync {
    /// # Errors
    ///
    /// - `Spawn` when the assistant cannot be started.
    /// - `Protocol` when the transcript contains a malformed line.
    /// - `Timeout` (with the partial run) when the context is cancelled or
    ///   its deadline passes.
    async fn invoke(
        &self,
        ctx: &InvokeContext,
        instruction: &str,
        workspace: &Path,
    ) -> Result<RunResult>;
}

/// [`Invoker`] that launches [`AssistantCommand`] as a child process.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    command: AssistantCommand,
    grace: Duration,
    stderr_tail_bytes: usize,
}

/// How the read loop ended.
enum StreamEnd {
    Completed,
    Eof,
    Cancelled,
    Malformed(EvalError),
}

impl ProcessInvoker {
    pub fn new(command: AssistantCommand) -> Self {
        Self {
            command,
            grace: Duration::from_secs(5),
            stderr_tail_bytes: 8 * 1024,
        }
    }

    pub fn from_config(config: &EvalConfig) -> Self {
        Self::new(config.assistant.clone())
            .with_grace_period(config.grace_period())
            .with_stderr_tail(config.stderr_tail_bytes)
    }

    /// Time between the graceful stop request and force-kill.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_stderr_tail(mut self, bytes: usize) -> Self {
        self.stderr_tail_bytes = bytes;
        self
    }
}

#[async_trait]
impl Invoker for ProcessInvoker {
    async fn invoke(
        &self,
        ctx: &InvokeContext,
        instruction: &str,
        workspace: &Path,
    ) -> Result<RunResult> {
        let run_id = Uuid::new_v4();
        let run_label = run_id.to_string();
        let started_at = Utc::now();
        let clock = std::time::Instant::now();

        let (mut session, stdout, stderr) =
            AssistantSession::spawn(&self.command, instruction, workspace)?;
        obs::emit_invocation_started(&run_label, &self.command.program, workspace);
        let mut stderr_task = tokio::spawn(read_tail(stderr, self.stderr_tail_bytes));

        let mut parser = TranscriptParser::new(self.command.skill_tool.clone());
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        let done = ctx.done();
        tokio::pin!(done);

        let end = loop {
            tokio::select! {
                biased;
                _ = &mut done => break StreamEnd::Cancelled,
                read = reader.read_until(b'\n', &mut buf) => match read {
                    Ok(0) => break StreamEnd::Eof,
                    Ok(_) => {
                        let fed = parser.feed_bytes(&buf);
                        buf.clear();
                        match fed {
                            Ok(added) => {
                                let total = parser.events().len();
                                for seq in total - added..total {
                                    obs::emit_event_captured(&run_label, seq, parser.events()[seq].kind());
                                }
                                if parser.is_complete() {
                                    break StreamEnd::Completed;
                                }
                            }
                            Err(e) => break StreamEnd::Malformed(e),
                        }
                    }
                    Err(e) => {
                        break StreamEnd::Malformed(EvalError::Protocol {
                            line_no: parser.line_no() + 1,
                            reason: format!("unreadable transcript line: {e}"),
                            raw: String::from_utf8_lossy(&buf).into_owned(),
                        })
                    }
                },
            }
        };

        // (timed out, exit status, stopped by us after a completion)
        let (timed_out, status, stopped) = match end {
            StreamEnd::Malformed(err) => {
                warn!(run_id = %run_label, error = %err, "assistant transcript malformed, stopping");
                session.terminate(self.grace).await;
                let _ = bounded_join(&mut stderr_task, self.grace).await;
                METRICS.inc_protocol_errors();
                return Err(err);
            }
            StreamEnd::Cancelled => (true, session.terminate(self.grace).await, false),
            StreamEnd::Completed => {
                // The assistant has said everything it will; give it the
                // grace period to exit by itself. The run finished before any
                // later deadline, so the completion decides its status.
                tokio::select! {
                    biased;
                    _ = &mut done => {
                        debug!(run_id = %run_label, "deadline reached after completion");
                        (false, session.terminate(self.grace).await, true)
                    }
                    _ = tokio::time::sleep(self.grace) => {
                        debug!(run_id = %run_label, "assistant lingered after completion");
                        (false, session.terminate(self.grace).await, true)
                    }
                    status = session.wait() => (false, status.ok(), false),
                }
            }
            StreamEnd::Eof => {
                tokio::select! {
                    biased;
                    _ = &mut done => (true, session.terminate(self.grace).await, false),
                    status = session.wait() => (false, status.ok(), false),
                }
            }
        };
        drop(session);

        let stderr_tail = bounded_join(&mut stderr_task, self.grace).await;
        let finished_at = Utc::now();
        let duration_ms = clock.elapsed().as_millis() as u64;
        let transcript = parser.finish();
        let run_status = classify(timed_out, &transcript, status.as_ref(), stopped);
        let final_output = transcript.final_output();

        let run = RunResult {
            run_id,
            instruction: instruction.to_string(),
            workspace: workspace.to_path_buf(),
            events: transcript.events,
            final_output,
            status: run_status,
            exit_code: status.and_then(|s| s.code()),
            session: transcript.session,
            timing: RunTiming {
                started_at,
                finished_at,
                duration_ms,
            },
            stderr_tail,
        };
        obs::emit_invocation_finished(&run_label, run_status.as_str(), run.events.len(), duration_ms);

        if timed_out {
            METRICS.inc_timeouts();
            return Err(EvalError::Timeout {
                elapsed_ms: duration_ms,
                partial: Box::new(run),
            });
        }
        Ok(run)
    }
}

/// Succeeded only when the assistant reported a non-error completion and
/// the process exited cleanly. A process stopped by the harness after its
/// completion is judged by the completion alone.
fn classify(
    timed_out: bool,
    transcript: &Transcript,
    status: Option<&ExitStatus>,
    stopped_after_completion: bool,
) -> RunStatus {
    if timed_out {
        return RunStatus::TimedOut;
    }
    let completed_ok = transcript.completion.as_ref().is_some_and(|c| !c.is_error);
    let exited_ok = stopped_after_completion || status.is_some_and(|s| s.success());
    if completed_ok && exited_ok {
        RunStatus::Succeeded
    } else {
        RunStatus::Failed
    }
}

/// Keep the last `limit` bytes written to `reader`.
async fn read_tail<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> String {
    let mut tail: Vec<u8> = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                tail.extend_from_slice(&buf[..n]);
                if tail.len() > limit {
                    let excess = tail.len() - limit;
                    tail.drain(..excess);
                }
            }
            Err(e) => {
                debug!(error = %e, "stderr read failed");
                break;
            }
        }
    }
    String::from_utf8_lossy(&tail).into_owned()
}

async fn bounded_join(task: &mut JoinHandle<String>, limit: Duration) -> String {
    match tokio::time::timeout(limit, &mut *task).await {
        Ok(Ok(tail)) => tail,
        Ok(Err(e)) => {
            debug!(error = %e, "stderr reader task failed");
            String::new()
        }
        Err(_) => {
            task.abort();
            String::new()
        }
    }
}
