//! Run record persistence.
//!
//! The engine saves a record when a run starts and again when it reaches a
//! terminal state. `save` is an upsert keyed by run id, so re-running the
//! same id overwrites the earlier record.

use crate::error::RunStoreError;
use crate::run::RunRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowloom_core::{WorkflowId, WorkflowRunId};
use rootcause::Report;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Storage for run records.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Inserts or replaces the record with the same id.
    async fn save(&self, record: &RunRecord) -> Result<(), Report<RunStoreError>>;

    async fn get(&self, run_id: WorkflowRunId) -> Result<Option<RunRecord>, Report<RunStoreError>>;

    /// Most recent runs of a workflow, newest first.
    async fn list_by_workflow(
        &self,
        workflow_id: WorkflowId,
        limit: usize,
    ) -> Result<Vec<RunRecord>, Report<RunStoreError>>;

    /// Deletes terminal runs that completed before `cutoff`. Returns the
    /// number of records removed.
    async fn purge_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, Report<RunStoreError>>;
}

/// In-process run store.
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    records: RwLock<HashMap<WorkflowRunId, RunRecord>>,
}

impl InMemoryRunStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn save(&self, record: &RunRecord) -> Result<(), Report<RunStoreError>> {
        self.records.write().await.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, run_id: WorkflowRunId) -> Result<Option<RunRecord>, Report<RunStoreError>> {
        Ok(self.records.read().await.get(&run_id).cloned())
    }

    async fn list_by_workflow(
        &self,
        workflow_id: WorkflowId,
        limit: usize,
    ) -> Result<Vec<RunRecord>, Report<RunStoreError>> {
        let records = self.records.read().await;
        let mut runs: Vec<_> = records
            .values()
            .filter(|r| r.workflow_id == workflow_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs.truncate(limit);
        Ok(runs)
    }

    async fn purge_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, Report<RunStoreError>> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| {
            !(r.status.is_terminal() && r.completed_at.is_some_and(|done| done < cutoff))
        });
        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::JsonMap;
    use crate::run::RunStatus;
    use chrono::Duration;

    fn pending(workflow_id: WorkflowId) -> RunRecord {
        RunRecord::pending(WorkflowRunId::new(), workflow_id, JsonMap::new())
    }

    #[tokio::test]
    async fn save_overwrites_same_id() {
        let store = InMemoryRunStore::new();
        let mut record = pending(WorkflowId::new());
        store.save(&record).await.expect("save");

        record.start();
        store.save(&record).await.expect("save");

        assert_eq!(store.len().await, 1);
        let stored = store.get(record.id).await.expect("get").expect("present");
        assert_eq!(stored.status, RunStatus::Running);
    }

    #[tokio::test]
    async fn list_by_workflow_filters_and_limits() {
        let store = InMemoryRunStore::new();
        let workflow_id = WorkflowId::new();
        for _ in 0..3 {
            store.save(&pending(workflow_id)).await.expect("save");
        }
        store.save(&pending(WorkflowId::new())).await.expect("save");

        let runs = store.list_by_workflow(workflow_id, 2).await.expect("list");
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.workflow_id == workflow_id));
    }

    #[tokio::test]
    async fn purge_removes_only_old_terminal_runs() {
        let store = InMemoryRunStore::new();
        let workflow_id = WorkflowId::new();

        let mut old = pending(workflow_id);
        old.start();
        old.complete(JsonMap::new());
        old.completed_at = Some(Utc::now() - Duration::days(40));

        let mut recent = pending(workflow_id);
        recent.start();
        recent.fail("x", None);

        let mut stuck = pending(workflow_id);
        stuck.start();
        stuck.started_at = Some(Utc::now() - Duration::days(40));

        for record in [&old, &recent, &stuck] {
            store.save(record).await.expect("save");
        }

        let removed = store
            .purge_terminal_before(Utc::now() - Duration::days(30))
            .await
            .expect("purge");
        assert_eq!(removed, 1);
        assert!(store.get(old.id).await.expect("get").is_none());
        assert!(store.get(recent.id).await.expect("get").is_some());
        assert!(store.get(stuck.id).await.expect("get").is_some());
    }
}
