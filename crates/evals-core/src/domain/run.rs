//! Run results produced by a single assistant invocation.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::{Event, ToolOutcome};

/// Overall status of an assistant run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The assistant reported completion without error.
    Succeeded,
    /// The assistant reported an error or exited without completing.
    Failed,
    /// The deadline fired or the caller cancelled the run.
    TimedOut,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::TimedOut => "timed_out",
        }
    }
}

/// Wall-clock timing for a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunTiming {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Session metadata reported by the assistant itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionInfo {
    pub session_id: Option<String>,
    pub model: Option<String>,
    pub num_turns: Option<u64>,
    pub cost_usd: Option<f64>,
    /// Duration the assistant reported for itself, when present.
    pub reported_duration_ms: Option<u64>,
}

/// The outcome of one assistant invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunResult {
    /// Unique identifier for this run.
    pub run_id: Uuid,

    /// The single directive sent to the assistant.
    pub instruction: String,

    /// Workspace the assistant ran in.
    pub workspace: PathBuf,

    /// Events in observation order.
    pub events: Vec<Event>,

    /// Final textual output.
    pub final_output: String,

    pub status: RunStatus,

    /// Process exit code, if the process exited on its own.
    pub exit_code: Option<i32>,

    pub session: SessionInfo,

    pub timing: RunTiming,

    /// Trailing stderr output, bounded.
    #[serde(default)]
    pub stderr_tail: String,
}

impl RunResult {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Names of all activated skills, in order, duplicates included.
    pub fn skills(&self) -> impl Iterator<Item = &str> {
        self.events.iter().filter_map(|e| match e {
            Event::SkillActivation { name } => Some(name.as_str()),
            _ => None,
        })
    }

    /// Names of all invoked tools, in order, duplicates included.
    pub fn tools(&self) -> impl Iterator<Item = &str> {
        self.events.iter().filter_map(|e| match e {
            Event::ToolInvocation { name, .. } => Some(name.as_str()),
            _ => None,
        })
    }

    /// Concatenation of every text chunk in event order.
    pub fn text_output(&self) -> String {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::TextChunk { content } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Fraction of tool invocations whose outcome was an error (0.0 when none ran).
    pub fn tool_error_rate(&self) -> f64 {
        let mut total = 0usize;
        let mut errors = 0usize;
        for event in &self.events {
            if let Event::ToolInvocation { outcome, .. } = event {
                total += 1;
                if matches!(outcome, ToolOutcome::Error { .. }) {
                    errors += 1;
                }
            }
        }
        if total == 0 {
            0.0
        } else {
            errors as f64 / total as f64
        }
    }
}
