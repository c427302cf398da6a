//! Evaluation harness for an autonomous coding assistant.
//!
//! A scenario seeds a fresh workspace from fixtures, runs the assistant once
//! with a single instruction under a deadline, captures the transcript as an
//! ordered list of [`Event`]s, checks it against the scenario's expectations
//! and against the accepted baseline, and archives the run.

pub mod archive;
pub mod assertions;
pub mod baseline;
pub mod config;
pub mod digest;
pub mod domain;
pub mod fakes;
pub mod harness;
pub mod invoker;
pub mod metrics;
pub mod obs;
pub mod regression;
pub mod telemetry;
pub mod workspace;

pub use archive::{read_archive, ArchiveKey, ArchiveRecord, ArchiveStore, FsArchiveStore};
pub use assertions::{
    output_mentions, output_omits, skill_used, tool_used, AssertionOutcome, AssertionReport,
};
pub use baseline::{BaselineStore, FsBaselineStore};
pub use config::{AssistantCommand, EvalConfig, RegressionTolerance};
pub use domain::{
    BaseFixture, EvalError, Event, Expectation, FixtureRef, MatchMode, Overlay, Result,
    RunResult, RunStatus, RunTiming, Scenario, ScenarioId, SessionInfo, ToolOutcome,
};
pub use harness::{ScenarioReport, ScenarioRunner};
pub use invoker::{InvokeContext, Invoker, ProcessInvoker, TranscriptParser};
pub use regression::{
    assert_no_regression, check_regression, compare, BaselineSummary, RegressionSignal,
    RegressionVerdict,
};
pub use workspace::{FixtureStore, Workspace, WorkspaceBuilder};

/// Crate version, recorded in CLI output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
