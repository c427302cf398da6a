//! Structured lifecycle events for scenario runs.
//!
//! Every event carries a stable `event = "..."` field so log pipelines can
//! filter on it. [`scenario_span`] ties everything logged during one
//! scenario to its id.

use tracing::{debug, info, warn};

/// Span for instrumenting a scenario's future.
pub fn scenario_span(scenario_id: &str) -> tracing::Span {
    tracing::info_span!("evals.scenario", scenario_id = %scenario_id)
}

pub fn emit_invocation_started(run_id: &str, program: &str, workspace: &std::path::Path) {
    info!(
        event = "invocation.started",
        run_id = %run_id,
        program = %program,
        workspace = %workspace.display(),
    );
}

pub fn emit_invocation_finished(run_id: &str, status: &str, events: usize, duration_ms: u64) {
    info!(
        event = "invocation.finished",
        run_id = %run_id,
        status = %status,
        events = events,
        duration_ms = duration_ms,
    );
}

/// One transcript event captured; debug level since runs produce many.
pub fn emit_event_captured(run_id: &str, seq: usize, kind: &str) {
    debug!(event = "transcript.event", run_id = %run_id, seq = seq, kind = %kind);
}

pub fn emit_assertions_evaluated(scenario_id: &str, total: usize, failed: usize) {
    info!(
        event = "assertions.evaluated",
        scenario_id = %scenario_id,
        total = total,
        failed = failed,
        passed = failed == 0,
    );
}

pub fn emit_regression_checked(scenario_id: &str, had_baseline: bool, worsened: &[String]) {
    info!(
        event = "regression.checked",
        scenario_id = %scenario_id,
        had_baseline = had_baseline,
        worsened = %worsened.join(","),
        passed = worsened.is_empty(),
    );
}

pub fn emit_archive_failed(scenario_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "archive.write_failed", scenario_id = %scenario_id, error = %error);
}
