//! Harness configuration.
//!
//! [`EvalConfig`] is built once (defaults → TOML file → `EVALS_*` environment
//! variables) and then passed explicitly to every component. Nothing in the
//! harness reads configuration from global state after that point, so
//! scenarios running in parallel never observe each other's settings.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{EvalError, Result};

/// Placeholder in [`AssistantCommand::args`] replaced by the instruction.
pub const INSTRUCTION_PLACEHOLDER: &str = "{instruction}";

/// How to launch the assistant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssistantCommand {
    /// Executable to run.
    pub program: String,

    /// Arguments. `{instruction}` is substituted; if no argument contains it
    /// the instruction is appended last.
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables for the assistant process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Tool name the assistant uses to activate a skill.
    #[serde(default = "default_skill_tool")]
    pub skill_tool: String,
}

fn default_skill_tool() -> String {
    "Skill".to_string()
}

impl Default for AssistantCommand {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: vec![
                "-p".to_string(),
                INSTRUCTION_PLACEHOLDER.to_string(),
                "--output-format".to_string(),
                "stream-json".to_string(),
                "--verbose".to_string(),
                "--permission-mode".to_string(),
                "bypassPermissions".to_string(),
            ],
            env: BTreeMap::new(),
            skill_tool: default_skill_tool(),
        }
    }
}

impl AssistantCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: BTreeMap::new(),
            skill_tool: default_skill_tool(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Final argument vector for `instruction`.
    pub fn render_args(&self, instruction: &str) -> Vec<String> {
        let mut substituted = false;
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|a| {
                if a.contains(INSTRUCTION_PLACEHOLDER) {
                    substituted = true;
                    a.replace(INSTRUCTION_PLACEHOLDER, instruction)
                } else {
                    a.clone()
                }
            })
            .collect();
        if !substituted {
            args.push(instruction.to_string());
        }
        args
    }
}

/// Tolerances used by the regression comparator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegressionTolerance {
    /// Allowed relative duration increase over the baseline (1.0 = twice as long).
    pub max_duration_increase: f64,

    /// Absolute duration increase (ms) ignored regardless of ratio.
    pub duration_slack_ms: u64,

    /// Allowed absolute increase in the tool error rate (0.0–1.0).
    pub max_error_rate_increase: f64,
}

impl Default for RegressionTolerance {
    fn default() -> Self {
        Self {
            max_duration_increase: 1.0,
            duration_slack_ms: 30_000,
            max_error_rate_increase: 0.10,
        }
    }
}

/// Configuration threaded through every harness call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvalConfig {
    /// Deadline for a single assistant invocation (seconds).
    pub timeout_secs: u64,

    /// Time allowed between the graceful stop request and force-kill (milliseconds).
    pub grace_period_ms: u64,

    /// Root of the fixture store (`<root>/<category>/<name>`).
    pub fixtures_dir: PathBuf,

    /// Root of the archive store.
    pub archive_dir: PathBuf,

    /// Root of the baseline store.
    pub baseline_dir: PathBuf,

    /// Leave workspaces on disk after the run for debugging.
    pub keep_workspaces: bool,

    /// Maximum scenarios executed concurrently by `run_all`.
    pub max_parallel: usize,

    /// Skip scenario execution entirely (quick local test passes).
    pub short_mode: bool,

    /// Bytes of stderr kept on the run result.
    pub stderr_tail_bytes: usize,

    pub assistant: AssistantCommand,

    pub regression: RegressionTolerance,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            grace_period_ms: 5_000,
            fixtures_dir: PathBuf::from("testdata/fixtures"),
            archive_dir: PathBuf::from("testdata/output"),
            baseline_dir: PathBuf::from("testdata/baselines"),
            keep_workspaces: false,
            max_parallel: 4,
            short_mode: false,
            stderr_tail_bytes: 8 * 1024,
            assistant: AssistantCommand::default(),
            regression: RegressionTolerance::default(),
        }
    }
}

impl EvalConfig {
    /// Parse configuration from TOML text; missing keys take their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: EvalConfig = toml::from_str(raw).map_err(|e| EvalError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EvalError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    /// Defaults overridden by `EVALS_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `EVALS_*` overrides using `lookup` to read variables.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("EVALS_TIMEOUT_SECS") {
            self.timeout_secs = parse_env("EVALS_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("EVALS_GRACE_PERIOD_MS") {
            self.grace_period_ms = parse_env("EVALS_GRACE_PERIOD_MS", &v)?;
        }
        if let Some(v) = lookup("EVALS_FIXTURES_DIR") {
            self.fixtures_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("EVALS_ARCHIVE_DIR") {
            self.archive_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("EVALS_BASELINE_DIR") {
            self.baseline_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("EVALS_KEEP_WORKSPACES") {
            self.keep_workspaces = parse_bool("EVALS_KEEP_WORKSPACES", &v)?;
        }
        if let Some(v) = lookup("EVALS_MAX_PARALLEL") {
            self.max_parallel = parse_env("EVALS_MAX_PARALLEL", &v)?;
        }
        if let Some(v) = lookup("EVALS_SHORT") {
            self.short_mode = parse_bool("EVALS_SHORT", &v)?;
        }
        if let Some(v) = lookup("EVALS_ASSISTANT") {
            self.assistant.program = v;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(EvalError::Config("timeout_secs must be positive".into()));
        }
        if self.max_parallel == 0 {
            return Err(EvalError::Config("max_parallel must be positive".into()));
        }
        if self.assistant.program.trim().is_empty() {
            return Err(EvalError::Config("assistant.program must not be empty".into()));
        }
        let tol = &self.regression;
        if tol.max_duration_increase < 0.0 || !(0.0..=1.0).contains(&tol.max_error_rate_increase)
        {
            return Err(EvalError::Config(
                "regression tolerances must be non-negative and error rate at most 1.0".into(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| EvalError::Config(format!("{key}={value}: {e}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(EvalError::Config(format!("{key}={other}: expected a boolean"))),
    }
}
