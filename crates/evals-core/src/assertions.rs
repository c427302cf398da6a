//! Checks over a [`RunResult`].
//!
//! Each check reads the run and returns an [`AssertionOutcome`]; none of
//! them mutate the run. [`AssertionReport::evaluate`] applies a list of
//! [`Expectation`]s and always evaluates every one of them, so a single run
//! surfaces all of its failures.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{EvalError, Expectation, MatchMode, Result, RunResult};

/// Longest output excerpt quoted in a diagnostic.
const EXCERPT_CHARS: usize = 400;

/// Result of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionOutcome {
    /// Stable key of the expectation (see [`Expectation::key`]).
    pub key: String,
    pub passed: bool,
    /// Human-readable explanation, present on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl AssertionOutcome {
    fn pass(key: String) -> Self {
        Self {
            key,
            passed: true,
            diagnostic: None,
        }
    }

    fn fail(key: String, diagnostic: String) -> Self {
        Self {
            key,
            passed: false,
            diagnostic: Some(diagnostic),
        }
    }

    /// `Ok(())` on pass, `AssertionFailed` with the diagnostic otherwise.
    pub fn into_result(self) -> Result<()> {
        if self.passed {
            return Ok(());
        }
        Err(EvalError::AssertionFailed {
            failures: vec![self.describe()],
        })
    }

    fn describe(&self) -> String {
        match &self.diagnostic {
            Some(d) => format!("{}: {d}", self.key),
            None => self.key.clone(),
        }
    }
}

/// Passes iff the run activated a skill called `name`.
pub fn skill_used(run: &RunResult, name: &str) -> AssertionOutcome {
    let key = Expectation::skill_used(name).key();
    if run.skills().any(|s| s == name) {
        return AssertionOutcome::pass(key);
    }
    AssertionOutcome::fail(
        key,
        format!(
            "skill `{name}` was never activated; activated skills: {}",
            listing(run.skills())
        ),
    )
}

/// Passes iff the run invoked a tool called `name`.
pub fn tool_used(run: &RunResult, name: &str) -> AssertionOutcome {
    let key = Expectation::tool_used(name).key();
    if run.tools().any(|t| t == name) {
        return AssertionOutcome::pass(key);
    }
    AssertionOutcome::fail(
        key,
        format!(
            "tool `{name}` was never invoked; invoked tools: {}",
            listing(run.tools())
        ),
    )
}

/// Passes iff the concatenated text output contains `pattern`.
pub fn output_mentions(run: &RunResult, pattern: &str, mode: MatchMode) -> AssertionOutcome {
    let key = Expectation::OutputMentions {
        pattern: pattern.to_string(),
        mode,
    }
    .key();
    let text = run.text_output();
    match matches(&text, pattern, mode) {
        Ok(true) => AssertionOutcome::pass(key),
        Ok(false) => AssertionOutcome::fail(
            key,
            format!("output does not mention {pattern:?}; output: {}", excerpt(&text)),
        ),
        Err(reason) => AssertionOutcome::fail(key, reason),
    }
}

/// Passes iff the concatenated text output does not contain `pattern`.
pub fn output_omits(run: &RunResult, pattern: &str, mode: MatchMode) -> AssertionOutcome {
    let key = Expectation::OutputOmits {
        pattern: pattern.to_string(),
        mode,
    }
    .key();
    let text = run.text_output();
    match matches(&text, pattern, mode) {
        Ok(false) => AssertionOutcome::pass(key),
        Ok(true) => AssertionOutcome::fail(
            key,
            format!("output unexpectedly mentions {pattern:?}; output: {}", excerpt(&text)),
        ),
        Err(reason) => AssertionOutcome::fail(key, reason),
    }
}

/// Apply one expectation.
pub fn check(run: &RunResult, expectation: &Expectation) -> AssertionOutcome {
    match expectation {
        Expectation::SkillUsed { name } => skill_used(run, name),
        Expectation::ToolUsed { name } => tool_used(run, name),
        Expectation::OutputMentions { pattern, mode } => output_mentions(run, pattern, *mode),
        Expectation::OutputOmits { pattern, mode } => output_omits(run, pattern, *mode),
    }
}

/// Outcomes of every expectation applied to one run, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionReport {
    pub outcomes: Vec<AssertionOutcome>,
}

impl AssertionReport {
    /// Evaluate all `expectations`; never stops at the first failure.
    pub fn evaluate(run: &RunResult, expectations: &[Expectation]) -> Self {
        Self {
            outcomes: expectations.iter().map(|e| check(run, e)).collect(),
        }
    }

    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &AssertionOutcome> {
        self.outcomes.iter().filter(|o| !o.passed)
    }

    pub fn passing_keys(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|o| o.passed)
            .map(|o| o.key.as_str())
    }

    pub fn failing_keys(&self) -> impl Iterator<Item = &str> {
        self.failures().map(|o| o.key.as_str())
    }

    /// Diagnostics for every failed check, `key: diagnostic`.
    pub fn failure_messages(&self) -> Vec<String> {
        self.failures().map(AssertionOutcome::describe).collect()
    }

    /// `AssertionFailed` listing every failure, or `Ok(())`.
    pub fn into_result(self) -> Result<()> {
        let failures = self.failure_messages();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(EvalError::AssertionFailed { failures })
        }
    }
}

fn matches(text: &str, pattern: &str, mode: MatchMode) -> std::result::Result<bool, String> {
    match mode {
        MatchMode::Literal => Ok(text.contains(pattern)),
        MatchMode::Regex => Regex::new(pattern)
            .map(|re| re.is_match(text))
            .map_err(|e| format!("invalid pattern {pattern:?}: {e}")),
    }
}

fn listing<'a>(names: impl Iterator<Item = &'a str>) -> String {
    let names: Vec<&str> = names.collect();
    if names.is_empty() {
        "(none)".to_string()
    } else {
        format!("[{}]", names.join(", "))
    }
}

fn excerpt(text: &str) -> String {
    if text.is_empty() {
        return "(empty)".to_string();
    }
    let count = text.chars().count();
    if count <= EXCERPT_CHARS {
        return format!("{text:?}");
    }
    let tail: String = text.chars().skip(count - EXCERPT_CHARS).collect();
    format!("...{tail:?}")
}
