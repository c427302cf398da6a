//! Baseline storage.
//!
//! The harness only reads baselines. Promotion is an explicit action taken
//! outside a scenario run (see the `promote` CLI command) and is serialized
//! per scenario id.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::info;

use crate::digest;
use crate::domain::{EvalError, Result, ScenarioId};
use crate::regression::BaselineSummary;

/// Baselines addressed by scenario id.
#[async_trait]
pub trait BaselineStore: Send + Sync {
    /// The current baseline for `scenario`, if one was ever promoted.
    async fn latest(&self, scenario: &ScenarioId) -> Result<Option<BaselineSummary>>;

    /// Make `summary` the baseline for its scenario, replacing any previous one.
    async fn promote(&self, summary: BaselineSummary) -> Result<()>;
}

/// Filesystem baseline store.
///
/// Layout: `<root>/<scenario>.json`, a digest-sealed envelope. Promotion
/// replaces the file with one rename, so readers in other processes (a
/// `run` racing a `promote`) see either the previous or the new baseline.
#[derive(Debug)]
pub struct FsBaselineStore {
    root: PathBuf,
    locks: Mutex<HashMap<ScenarioId, Arc<tokio::sync::Mutex<()>>>>,
}

impl FsBaselineStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, scenario: &ScenarioId) -> PathBuf {
        self.root.join(format!("{scenario}.json"))
    }

    fn lock_for(&self, scenario: &ScenarioId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(scenario.clone()).or_default().clone()
    }
}

#[async_trait]
impl BaselineStore for FsBaselineStore {
    async fn latest(&self, scenario: &ScenarioId) -> Result<Option<BaselineSummary>> {
        let path = self.path_for(scenario);
        let summary: BaselineSummary = match digest::read_sealed(&path) {
            Ok(summary) => summary,
            Err(EvalError::Io(io)) if io.kind() == std::io::ErrorKind::NotFound => {
                return Ok(None)
            }
            Err(EvalError::Io(io)) => {
                return Err(EvalError::Storage(format!(
                    "cannot read baseline {}: {io}",
                    path.display()
                )))
            }
            Err(other) => return Err(other),
        };
        if &summary.scenario_id != scenario {
            return Err(EvalError::Storage(format!(
                "baseline {} belongs to scenario {}",
                path.display(),
                summary.scenario_id
            )));
        }
        Ok(Some(summary))
    }

    async fn promote(&self, summary: BaselineSummary) -> Result<()> {
        let path = self.path_for(&summary.scenario_id);
        let lock = self.lock_for(&summary.scenario_id);
        let _guard = lock.lock().await;

        digest::write_sealed(&path, &summary).map_err(|e| {
            EvalError::Storage(format!("cannot write baseline {}: {e}", path.display()))
        })?;
        info!(
            scenario_id = %summary.scenario_id,
            run_id = %summary.run_id,
            path = %path.display(),
            "baseline promoted"
        );
        Ok(())
    }
}
