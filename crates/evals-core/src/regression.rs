//! Regression comparison against a scenario's accepted baseline.
//!
//! A baseline is a [`BaselineSummary`] derived from an earlier run. The
//! signals compared, each named in the failure when it worsens:
//!
//! - `success`: the baseline run succeeded and the current one did not.
//! - `assertion:<key>`: a check that passed in the baseline fails now.
//! - `duration`: the run took longer than the baseline by more than both
//!   the relative and the absolute tolerance.
//! - `tool_error_rate`: the share of failed tool invocations rose by more
//!   than the tolerance.
//!
//! Without a stored baseline the check always passes.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::assertions::AssertionReport;
use crate::baseline::BaselineStore;
use crate::config::RegressionTolerance;
use crate::domain::{EvalError, Result, RunResult, ScenarioId};
use crate::obs;

/// Quality signals recorded for an accepted run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineSummary {
    pub scenario_id: ScenarioId,
    pub run_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub succeeded: bool,
    /// Keys of checks that passed.
    pub passing: BTreeSet<String>,
    /// Keys of checks already failing when the baseline was accepted.
    pub known_failing: BTreeSet<String>,
    pub duration_ms: u64,
    pub tool_error_rate: f64,
}

impl BaselineSummary {
    pub fn from_run(scenario_id: ScenarioId, run: &RunResult, report: &AssertionReport) -> Self {
        Self {
            scenario_id,
            run_id: run.run_id,
            recorded_at: Utc::now(),
            succeeded: run.succeeded(),
            passing: report.passing_keys().map(str::to_string).collect(),
            known_failing: report.failing_keys().map(str::to_string).collect(),
            duration_ms: run.timing.duration_ms,
            tool_error_rate: run.tool_error_rate(),
        }
    }
}

/// One worsened signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionSignal {
    pub signal: String,
    pub detail: String,
}

/// Outcome of comparing a run to its baseline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegressionVerdict {
    /// Run id of the baseline compared against, if there was one.
    pub baseline_run_id: Option<Uuid>,
    pub regressions: Vec<RegressionSignal>,
}

impl RegressionVerdict {
    /// Verdict used when no baseline exists.
    pub fn no_baseline() -> Self {
        Self::default()
    }

    pub fn passed(&self) -> bool {
        self.regressions.is_empty()
    }

    pub fn had_baseline(&self) -> bool {
        self.baseline_run_id.is_some()
    }

    pub fn signal_names(&self) -> Vec<String> {
        self.regressions.iter().map(|r| r.signal.clone()).collect()
    }

    /// `RegressionDetected` naming every worsened signal, or `Ok(())`.
    pub fn into_result(self) -> Result<()> {
        if self.passed() {
            return Ok(());
        }
        let (signals, details) = self
            .regressions
            .into_iter()
            .map(|r| (r.signal, r.detail))
            .unzip();
        Err(EvalError::RegressionDetected { signals, details })
    }
}

/// Compare `current` against `baseline`.
pub fn compare(
    baseline: &BaselineSummary,
    current: &BaselineSummary,
    tolerance: &RegressionTolerance,
) -> RegressionVerdict {
    let mut regressions = Vec::new();

    if baseline.succeeded && !current.succeeded {
        regressions.push(RegressionSignal {
            signal: "success".to_string(),
            detail: format!("baseline run {} succeeded, this run did not", baseline.run_id),
        });
    }

    for key in &baseline.passing {
        if !current.passing.contains(key) && current.known_failing.contains(key) {
            regressions.push(RegressionSignal {
                signal: format!("assertion:{key}"),
                detail: format!("`{key}` passed in the baseline and fails now"),
            });
        }
    }

    let base_ms = baseline.duration_ms as f64;
    let limit_ms = base_ms * (1.0 + tolerance.max_duration_increase);
    let increase_ms = current.duration_ms.saturating_sub(baseline.duration_ms);
    if current.duration_ms as f64 > limit_ms && increase_ms > tolerance.duration_slack_ms {
        regressions.push(RegressionSignal {
            signal: "duration".to_string(),
            detail: format!(
                "took {}ms vs baseline {}ms (allowed up to {:.0}ms and +{}ms)",
                current.duration_ms, baseline.duration_ms, limit_ms, tolerance.duration_slack_ms
            ),
        });
    }

    let rate_increase = current.tool_error_rate - baseline.tool_error_rate;
    if rate_increase > tolerance.max_error_rate_increase {
        regressions.push(RegressionSignal {
            signal: "tool_error_rate".to_string(),
            detail: format!(
                "tool error rate {:.2} vs baseline {:.2} (allowed +{:.2})",
                current.tool_error_rate, baseline.tool_error_rate, tolerance.max_error_rate_increase
            ),
        });
    }

    RegressionVerdict {
        baseline_run_id: Some(baseline.run_id),
        regressions,
    }
}

/// Load the scenario's baseline and compare `run` against it.
///
/// # Errors
///
/// Only storage failures; a worsened signal is reported in the verdict.
pub async fn check_regression(
    store: &dyn BaselineStore,
    scenario_id: &ScenarioId,
    run: &RunResult,
    report: &AssertionReport,
    tolerance: &RegressionTolerance,
) -> Result<RegressionVerdict> {
    let verdict = match store.latest(scenario_id).await? {
        Some(baseline) => {
            let current = BaselineSummary::from_run(scenario_id.clone(), run, report);
            compare(&baseline, &current, tolerance)
        }
        None => RegressionVerdict::no_baseline(),
    };
    obs::emit_regression_checked(
        scenario_id.as_str(),
        verdict.had_baseline(),
        &verdict.signal_names(),
    );
    Ok(verdict)
}

/// Fail with `RegressionDetected` if `run` is worse than the scenario's
/// baseline. Passes when no baseline is stored.
pub async fn assert_no_regression(
    store: &dyn BaselineStore,
    scenario_id: &ScenarioId,
    run: &RunResult,
    report: &AssertionReport,
    tolerance: &RegressionTolerance,
) -> Result<()> {
    check_regression(store, scenario_id, run, report, tolerance)
        .await?
        .into_result()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(succeeded: bool, passing: &[&str], failing: &[&str], ms: u64, rate: f64) -> BaselineSummary {
        BaselineSummary {
            scenario_id: ScenarioId::new("review-gha").unwrap(),
            run_id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            succeeded,
            passing: passing.iter().map(|s| s.to_string()).collect(),
            known_failing: failing.iter().map(|s| s.to_string()).collect(),
            duration_ms: ms,
            tool_error_rate: rate,
        }
    }

    #[test]
    fn test_identical_runs_do_not_regress() {
        let base = summary(true, &["skill_used:x"], &[], 60_000, 0.0);
        let verdict = compare(&base, &base.clone(), &RegressionTolerance::default());
        assert!(verdict.passed());
        assert!(verdict.had_baseline());
    }

    #[test]
    fn test_success_and_assertion_regressions_named() {
        let base = summary(true, &["skill_used:x", "tool_used:Bash"], &[], 1_000, 0.0);
        let cur = summary(false, &["tool_used:Bash"], &["skill_used:x"], 1_000, 0.0);
        let verdict = compare(&base, &cur, &RegressionTolerance::default());
        assert_eq!(verdict.signal_names(), vec!["success", "assertion:skill_used:x"]);

        match verdict.into_result().unwrap_err() {
            EvalError::RegressionDetected { signals, details } => {
                assert_eq!(signals.len(), 2);
                assert_eq!(details.len(), 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_known_failing_and_removed_checks_are_not_regressions() {
        let base = summary(false, &["tool_used:Bash"], &["skill_used:x"], 1_000, 0.0);
        // skill_used:x was already failing; tool_used:Bash is no longer checked.
        let cur = summary(false, &[], &["skill_used:x"], 1_000, 0.0);
        assert!(compare(&base, &cur, &RegressionTolerance::default()).passed());
    }

    #[test]
    fn test_duration_needs_both_ratio_and_slack() {
        let tol = RegressionTolerance {
            max_duration_increase: 0.5,
            duration_slack_ms: 10_000,
            max_error_rate_increase: 0.1,
        };
        let base = summary(true, &[], &[], 10_000, 0.0);

        // 2x slower but only +10s: within slack.
        assert!(compare(&base, &summary(true, &[], &[], 20_000, 0.0), &tol).passed());
        // 3x slower and +20s: regression.
        let verdict = compare(&base, &summary(true, &[], &[], 30_000, 0.0), &tol);
        assert_eq!(verdict.signal_names(), vec!["duration"]);
        // Faster is never a regression.
        assert!(compare(&base, &summary(true, &[], &[], 1, 0.0), &tol).passed());
    }

    #[test]
    fn test_tool_error_rate_tolerance() {
        let tol = RegressionTolerance::default();
        let base = summary(true, &[], &[], 1_000, 0.10);
        assert!(compare(&base, &summary(true, &[], &[], 1_000, 0.15), &tol).passed());
        let verdict = compare(&base, &summary(true, &[], &[], 1_000, 0.50), &tol);
        assert_eq!(verdict.signal_names(), vec!["tool_error_rate"]);
    }

    #[test]
    fn test_no_baseline_verdict_passes() {
        let verdict = RegressionVerdict::no_baseline();
        assert!(verdict.passed());
        assert!(!verdict.had_baseline());
        assert!(verdict.into_result().is_ok());
    }
}
