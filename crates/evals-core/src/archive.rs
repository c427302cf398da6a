//! Run archiving.
//!
//! Every run is archived, pass or fail, including partial runs cut short by
//! a timeout. A failed archive write is reported on its own and never changes
//! a scenario's verdict.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::assertions::AssertionReport;
use crate::digest;
use crate::domain::{EvalError, Result, RunResult, ScenarioId};

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3fZ";

/// Everything persisted for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub scenario_id: ScenarioId,
    pub archived_at: DateTime<Utc>,
    pub run: RunResult,
    /// Absent when the invocation failed before checks could run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertions: Option<AssertionReport>,
    /// Invocation error (e.g. timeout) that ended the run, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_error: Option<String>,
}

impl ArchiveRecord {
    pub fn new(scenario_id: ScenarioId, run: RunResult) -> Self {
        Self {
            scenario_id,
            archived_at: Utc::now(),
            run,
            assertions: None,
            invocation_error: None,
        }
    }

    pub fn with_assertions(mut self, report: AssertionReport) -> Self {
        self.assertions = Some(report);
        self
    }

    pub fn with_invocation_error(mut self, error: impl std::fmt::Display) -> Self {
        self.invocation_error = Some(error.to_string());
        self
    }

    pub fn key(&self) -> ArchiveKey {
        ArchiveKey {
            scenario_id: self.scenario_id.clone(),
            archived_at: self.archived_at,
            run_id: self.run.run_id,
        }
    }
}

/// Address of an archived run: scenario plus archive timestamp. The run id
/// disambiguates runs archived in the same millisecond.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveKey {
    pub scenario_id: ScenarioId,
    pub archived_at: DateTime<Utc>,
    pub run_id: Uuid,
}

impl ArchiveKey {
    /// `<timestamp>-<run id>`, sortable by time.
    pub fn file_stem(&self) -> String {
        format!("{}-{}", self.archived_at.format(TIMESTAMP_FORMAT), self.run_id)
    }
}

#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Persist `record`.
    ///
    /// # Errors
    ///
    /// `ArchiveWrite` on any storage failure.
    async fn put(&self, record: &ArchiveRecord) -> Result<ArchiveKey>;

    /// Read back a record previously stored under `key`.
    async fn get(&self, key: &ArchiveKey) -> Result<ArchiveRecord>;
}

/// Filesystem archive.
///
/// Layout: `<root>/<scenario>/<timestamp>-<run id>.json`, each file a
/// digest-sealed envelope.
#[derive(Debug, Clone)]
pub struct FsArchiveStore {
    root: PathBuf,
}

impl FsArchiveStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &ArchiveKey) -> PathBuf {
        self.root
            .join(key.scenario_id.as_str())
            .join(format!("{}.json", key.file_stem()))
    }
}

#[async_trait]
impl ArchiveStore for FsArchiveStore {
    async fn put(&self, record: &ArchiveRecord) -> Result<ArchiveKey> {
        let key = record.key();
        let path = self.path_for(&key);
        digest::write_sealed(&path, record)
            .map_err(|e| EvalError::ArchiveWrite(format!("{}: {e}", path.display())))?;
        info!(
            scenario_id = %key.scenario_id,
            run_id = %key.run_id,
            path = %path.display(),
            "run archived"
        );
        Ok(key)
    }

    async fn get(&self, key: &ArchiveKey) -> Result<ArchiveRecord> {
        read_archive(&self.path_for(key))
    }
}

/// Read an archived record from `path`, verifying its digest.
pub fn read_archive(path: &Path) -> Result<ArchiveRecord> {
    digest::read_sealed(path).map_err(|e| match e {
        EvalError::Io(io) => {
            EvalError::Storage(format!("cannot read archive {}: {io}", path.display()))
        }
        other => other,
    })
}
