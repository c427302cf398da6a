//! Scenario execution: workspace, invocation, checks, archive, regression.
//!
//! Workspace and invocation failures end a scenario immediately and are
//! returned as errors. A timeout is the exception: its partial run is still
//! archived and reported. Assertion and regression failures are collected
//! into the [`ScenarioReport`]; archive failures are reported next to them
//! without affecting the verdict.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{info, warn, Instrument};

use crate::archive::{ArchiveKey, ArchiveRecord, ArchiveStore, FsArchiveStore};
use crate::assertions::AssertionReport;
use crate::baseline::{BaselineStore, FsBaselineStore};
use crate::config::EvalConfig;
use crate::domain::{EvalError, Result, RunResult, Scenario, ScenarioId};
use crate::invoker::{InvokeContext, Invoker, ProcessInvoker};
use crate::metrics::METRICS;
use crate::obs;
use crate::regression::{check_regression, RegressionVerdict};
use crate::workspace::{FixtureStore, WorkspaceBuilder};

/// Everything learned from running one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub scenario_id: ScenarioId,
    /// Set when short mode skipped the scenario.
    #[serde(default)]
    pub skipped: bool,
    pub run: Option<RunResult>,
    /// Invocation error that cut the run short (timeout).
    pub invocation_error: Option<String>,
    pub assertions: Option<AssertionReport>,
    pub regression: Option<RegressionVerdict>,
    /// Baseline could not be read.
    pub regression_error: Option<String>,
    pub archive_key: Option<ArchiveKey>,
    /// Reported separately; never changes [`ScenarioReport::passed`].
    pub archive_error: Option<String>,
    /// Workspace left on disk for debugging.
    pub kept_workspace: Option<PathBuf>,
}

impl ScenarioReport {
    fn new(scenario_id: ScenarioId) -> Self {
        Self {
            scenario_id,
            skipped: false,
            run: None,
            invocation_error: None,
            assertions: None,
            regression: None,
            regression_error: None,
            archive_key: None,
            archive_error: None,
            kept_workspace: None,
        }
    }

    pub fn skipped(scenario_id: ScenarioId) -> Self {
        Self {
            skipped: true,
            ..Self::new(scenario_id)
        }
    }

    pub fn timed_out(&self) -> bool {
        self.invocation_error.is_some()
    }

    pub fn passed(&self) -> bool {
        self.skipped || self.failures().is_empty()
    }

    /// Every defect found, in the order: invocation, assertions, regression.
    pub fn failures(&self) -> Vec<String> {
        let mut failures = Vec::new();
        if let Some(e) = &self.invocation_error {
            failures.push(e.clone());
        }
        if let Some(report) = &self.assertions {
            failures.extend(report.failure_messages());
        }
        if let Some(verdict) = &self.regression {
            failures.extend(
                verdict
                    .regressions
                    .iter()
                    .map(|r| format!("regression in {}: {}", r.signal, r.detail)),
            );
        }
        if let Some(e) = &self.regression_error {
            failures.push(format!("regression check failed: {e}"));
        }
        failures
    }

    /// Convert into the harness error taxonomy.
    ///
    /// `Timeout` (with the partial run) when the invocation was cut short;
    /// `AssertionFailed` listing every assertion and regression failure when
    /// any check failed; `RegressionDetected` when only the baseline
    /// comparison failed.
    pub fn into_result(self) -> Result<()> {
        if self.timed_out() {
            if let Some(run) = self.run {
                return Err(EvalError::Timeout {
                    elapsed_ms: run.timing.duration_ms,
                    partial: Box::new(run),
                });
            }
        }
        let assertions_failed = self.assertions.as_ref().is_some_and(|r| !r.passed());
        if assertions_failed || self.regression_error.is_some() {
            return Err(EvalError::AssertionFailed {
                failures: self.failures(),
            });
        }
        match self.regression {
            Some(verdict) => verdict.into_result(),
            None => Ok(()),
        }
    }
}

/// Runs scenarios against an [`Invoker`] with explicit configuration.
///
/// Cheap to clone; clones share the invoker and stores.
#[derive(Clone)]
pub struct ScenarioRunner {
    config: Arc<EvalConfig>,
    fixtures: FixtureStore,
    invoker: Arc<dyn Invoker>,
    baselines: Arc<dyn BaselineStore>,
    archive: Arc<dyn ArchiveStore>,
}

impl std::fmt::Debug for ScenarioRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenarioRunner")
            .field("config", &self.config)
            .field("fixtures", &self.fixtures)
            .finish_non_exhaustive()
    }
}

impl ScenarioRunner {
    pub fn new(
        config: EvalConfig,
        invoker: Arc<dyn Invoker>,
        baselines: Arc<dyn BaselineStore>,
        archive: Arc<dyn ArchiveStore>,
    ) -> Self {
        Self {
            fixtures: FixtureStore::new(&config.fixtures_dir),
            config: Arc::new(config),
            invoker,
            baselines,
            archive,
        }
    }

    /// Runner backed by the assistant process and filesystem stores.
    pub fn from_config(config: EvalConfig) -> Self {
        let invoker = Arc::new(ProcessInvoker::from_config(&config));
        let baselines = Arc::new(FsBaselineStore::new(&config.baseline_dir));
        let archive = Arc::new(FsArchiveStore::new(&config.archive_dir));
        Self::new(config, invoker, baselines, archive)
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    pub async fn run(&self, scenario: &Scenario) -> Result<ScenarioReport> {
        self.run_with_context(&InvokeContext::new(), scenario).await
    }

    /// Run one scenario; cancelling `parent` cancels its invocation.
    pub async fn run_with_context(
        &self,
        parent: &InvokeContext,
        scenario: &Scenario,
    ) -> Result<ScenarioReport> {
        let span = obs::scenario_span(scenario.id.as_str());
        self.run_inner(parent, scenario).instrument(span).await
    }

    async fn run_inner(&self, parent: &InvokeContext, scenario: &Scenario) -> Result<ScenarioReport> {
        if self.config.short_mode {
            info!(scenario_id = %scenario.id, "short mode, scenario skipped");
            return Ok(ScenarioReport::skipped(scenario.id.clone()));
        }
        METRICS.inc_scenarios_run();

        let workspace = WorkspaceBuilder::for_scenario(&self.fixtures, scenario)
            .keep(self.config.keep_workspaces)
            .build()?;

        let timeout = scenario
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config.timeout());
        let ctx = parent.child(Some(timeout));

        let mut report = ScenarioReport::new(scenario.id.clone());
        let invoked = self
            .invoker
            .invoke(&ctx, &scenario.instruction, workspace.path())
            .await;
        let run = match invoked {
            Ok(run) => run,
            Err(EvalError::Timeout {
                elapsed_ms,
                partial,
            }) => {
                warn!(scenario_id = %scenario.id, elapsed_ms, "scenario timed out");
                report.invocation_error = Some(format!(
                    "assistant run exceeded its deadline after {elapsed_ms}ms"
                ));
                *partial
            }
            Err(e) => return Err(e),
        };

        let mut record = ArchiveRecord::new(scenario.id.clone(), run.clone());
        if let Some(err) = &report.invocation_error {
            record = record.with_invocation_error(err);
        } else {
            let assertions = AssertionReport::evaluate(&run, &scenario.expectations);
            obs::emit_assertions_evaluated(
                scenario.id.as_str(),
                assertions.outcomes.len(),
                assertions.failures().count(),
            );
            record = record.with_assertions(assertions.clone());

            match check_regression(
                self.baselines.as_ref(),
                &scenario.id,
                &run,
                &assertions,
                &self.config.regression,
            )
            .await
            {
                Ok(verdict) => report.regression = Some(verdict),
                Err(e) => {
                    warn!(scenario_id = %scenario.id, error = %e, "baseline unavailable");
                    report.regression_error = Some(e.to_string());
                }
            }
            report.assertions = Some(assertions);
        }

        match self.archive.put(&record).await {
            Ok(key) => report.archive_key = Some(key),
            Err(e) => {
                METRICS.inc_archive_failures();
                obs::emit_archive_failed(scenario.id.as_str(), &e);
                report.archive_error = Some(e.to_string());
            }
        }

        if workspace.is_kept() {
            report.kept_workspace = Some(workspace.keep());
        }
        report.run = Some(run);
        info!(
            scenario_id = %scenario.id,
            passed = report.passed(),
            failures = report.failures().len(),
            "scenario finished"
        );
        Ok(report)
    }

    /// Run `scenarios` concurrently, at most `max_parallel` at a time.
    /// Results are returned in input order.
    pub async fn run_all(&self, scenarios: Vec<Scenario>) -> Vec<(ScenarioId, Result<ScenarioReport>)> {
        self.run_all_with_context(&InvokeContext::new(), scenarios)
            .await
    }

    pub async fn run_all_with_context(
        &self,
        parent: &InvokeContext,
        scenarios: Vec<Scenario>,
    ) -> Vec<(ScenarioId, Result<ScenarioReport>)> {
        let sem = Arc::new(Semaphore::new(self.config.max_parallel));
        let mut tasks = Vec::with_capacity(scenarios.len());

        for scenario in scenarios {
            let runner = self.clone();
            let sem = sem.clone();
            let ctx = parent.child(None);
            let id = scenario.id.clone();
            let task = tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                runner.run_with_context(&ctx, &scenario).await
            });
            tasks.push((id, task));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for (id, task) in tasks {
            let result = match task.await {
                Ok(result) => result,
                Err(e) => Err(EvalError::Io(std::io::Error::other(format!(
                    "scenario task for {id} failed: {e}"
                )))),
            };
            results.push((id, result));
        }
        METRICS.flush();
        results
    }
}
