//! Error taxonomy for the evaluation harness.

use std::path::PathBuf;

use super::run::RunResult;

/// Errors produced while building, invoking, checking or archiving a scenario run.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("fixture not found: {category}/{name} (looked in {path})")]
    FixtureNotFound {
        category: String,
        name: String,
        path: PathBuf,
    },

    #[error("workspace io error at {path}: {reason}")]
    WorkspaceIo { path: PathBuf, reason: String },

    #[error("failed to start assistant `{program}`: {reason}")]
    Spawn { program: String, reason: String },

    #[error("assistant protocol error on line {line_no}: {reason} (raw: {raw})")]
    Protocol {
        line_no: usize,
        reason: String,
        raw: String,
    },

    #[error("assistant run exceeded its deadline after {elapsed_ms}ms ({} events captured)", partial.events.len())]
    Timeout {
        elapsed_ms: u64,
        partial: Box<RunResult>,
    },

    #[error("{} assertion(s) failed: {}", failures.len(), failures.join("; "))]
    AssertionFailed { failures: Vec<String> },

    #[error("regression detected in {}: {}", signals.join(", "), details.join("; "))]
    RegressionDetected {
        signals: Vec<String>,
        details: Vec<String>,
    },

    #[error("archive write failed: {0}")]
    ArchiveWrite(String),

    #[error("invalid scenario: {0}")]
    InvalidScenario(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EvalError {
    /// Partial run captured before a timeout, if this is a `Timeout`.
    pub fn partial_run(&self) -> Option<&RunResult> {
        match self {
            EvalError::Timeout { partial, .. } => Some(partial),
            _ => None,
        }
    }
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, EvalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_not_found_display() {
        let err = EvalError::FixtureNotFound {
            category: "gha".to_string(),
            name: "simple-ci.yml".to_string(),
            path: PathBuf::from("/fixtures/gha/simple-ci.yml"),
        };
        let msg = err.to_string();
        assert!(msg.contains("fixture not found"));
        assert!(msg.contains("gha/simple-ci.yml"));
    }

    #[test]
    fn test_protocol_error_keeps_raw_line() {
        let err = EvalError::Protocol {
            line_no: 3,
            reason: "expected value".to_string(),
            raw: "{not json".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("line 3"));
        assert!(msg.contains("{not json"));
    }

    #[test]
    fn test_assertion_failed_lists_every_failure() {
        let err = EvalError::AssertionFailed {
            failures: vec!["skill missing".to_string(), "tool missing".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("2 assertion(s) failed"));
        assert!(msg.contains("skill missing"));
        assert!(msg.contains("tool missing"));
    }

    #[test]
    fn test_partial_run_only_on_timeout() {
        assert!(EvalError::Storage("down".to_string()).partial_run().is_none());
        assert!(EvalError::ArchiveWrite("disk full".to_string())
            .partial_run()
            .is_none());
    }
}
