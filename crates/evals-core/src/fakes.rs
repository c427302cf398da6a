//! In-memory fakes for the storage traits (testing only).
//!
//! `MemoryBaselineStore` and `MemoryArchiveStore` satisfy the trait
//! contracts without touching the filesystem. `MemoryArchiveStore` can also
//! be told to fail every write, for exercising archive-failure reporting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::archive::{ArchiveKey, ArchiveRecord, ArchiveStore};
use crate::baseline::BaselineStore;
use crate::domain::{EvalError, Result, ScenarioId};
use crate::regression::BaselineSummary;

/// Baselines kept in a `HashMap<scenario, summary>`.
#[derive(Debug, Default)]
pub struct MemoryBaselineStore {
    baselines: Mutex<HashMap<ScenarioId, BaselineSummary>>,
}

impl MemoryBaselineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BaselineStore for MemoryBaselineStore {
    async fn latest(&self, scenario: &ScenarioId) -> Result<Option<BaselineSummary>> {
        let baselines = self.baselines.lock().unwrap_or_else(|e| e.into_inner());
        Ok(baselines.get(scenario).cloned())
    }

    async fn promote(&self, summary: BaselineSummary) -> Result<()> {
        let mut baselines = self.baselines.lock().unwrap_or_else(|e| e.into_inner());
        baselines.insert(summary.scenario_id.clone(), summary);
        Ok(())
    }
}

/// Archive records kept in insertion order.
#[derive(Debug, Default)]
pub struct MemoryArchiveStore {
    records: Mutex<Vec<ArchiveRecord>>,
    fail_writes: AtomicBool,
}

impl MemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every `put` fails with `ArchiveWrite`.
    pub fn failing() -> Self {
        let store = Self::default();
        store.fail_writes.store(true, Ordering::SeqCst);
        store
    }

    pub fn records(&self) -> Vec<ArchiveRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ArchiveStore for MemoryArchiveStore {
    async fn put(&self, record: &ArchiveRecord) -> Result<ArchiveKey> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(EvalError::ArchiveWrite("archive store unavailable".to_string()));
        }
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.push(record.clone());
        Ok(record.key())
    }

    async fn get(&self, key: &ArchiveKey) -> Result<ArchiveRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records
            .iter()
            .find(|r| &r.key() == key)
            .cloned()
            .ok_or_else(|| {
                EvalError::Storage(format!("no archived run {} for {}", key.run_id, key.scenario_id))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeSet;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_memory_baseline_roundtrip() {
        let store = MemoryBaselineStore::new();
        let id = ScenarioId::new("s").unwrap();
        assert!(store.latest(&id).await.unwrap().is_none());

        let summary = BaselineSummary {
            scenario_id: id.clone(),
            run_id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            succeeded: true,
            passing: BTreeSet::new(),
            known_failing: BTreeSet::new(),
            duration_ms: 5,
            tool_error_rate: 0.0,
        };
        store.promote(summary.clone()).await.unwrap();
        assert_eq!(store.latest(&id).await.unwrap(), Some(summary));
    }
}
