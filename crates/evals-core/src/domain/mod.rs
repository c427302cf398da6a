//! Domain model: scenarios, run results, transcript events and the error taxonomy.

pub mod error;
pub mod event;
pub mod run;
pub mod scenario;

pub use error::{EvalError, Result};
pub use event::{Event, ToolOutcome};
pub use run::{RunResult, RunStatus, RunTiming, SessionInfo};
pub use scenario::{
    BaseFixture, Expectation, FixtureRef, MatchMode, Overlay, Scenario, ScenarioId,
};
