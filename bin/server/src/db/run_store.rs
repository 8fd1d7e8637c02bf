//! Postgres-backed run records.
//!
//! The whole record is stored as JSONB next to the columns queries filter
//! on. `save` upserts on the run id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowloom_core::{WorkflowId, WorkflowRunId};
use flowloom_workflow::{RunRecord, RunStatus, RunStore, RunStoreError};
use rootcause::Report;
use sqlx::PgPool;

const TERMINAL_STATUSES: [RunStatus; 3] =
    [RunStatus::Completed, RunStatus::Failed, RunStatus::Cancelled];

/// Run store on the `workflow_runs` table.
#[derive(Debug, Clone)]
pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    /// Creates a new store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn unavailable(e: sqlx::Error) -> RunStoreError {
    RunStoreError::Unavailable {
        message: e.to_string(),
    }
}

fn decode(record: &str) -> Result<RunRecord, RunStoreError> {
    serde_json::from_str(record).map_err(|e| RunStoreError::Serialization {
        message: e.to_string(),
    })
}

fn terminal_statuses() -> Vec<&'static str> {
    TERMINAL_STATUSES.iter().map(RunStatus::as_str).collect()
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn save(&self, record: &RunRecord) -> Result<(), Report<RunStoreError>> {
        let encoded =
            serde_json::to_string(record).map_err(|e| RunStoreError::Serialization {
                message: e.to_string(),
            })?;

        sqlx::query(
            r#"
            INSERT INTO workflow_runs (id, workflow_id, status, record, created_at, completed_at)
            VALUES ($1, $2, $3, $4::jsonb, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET workflow_id = EXCLUDED.workflow_id,
                status = EXCLUDED.status,
                record = EXCLUDED.record,
                created_at = EXCLUDED.created_at,
                completed_at = EXCLUDED.completed_at
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.workflow_id.to_string())
        .bind(record.status.as_str())
        .bind(encoded)
        .bind(record.created_at)
        .bind(record.completed_at)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(())
    }

    async fn get(&self, run_id: WorkflowRunId) -> Result<Option<RunRecord>, Report<RunStoreError>> {
        let row: Option<String> =
            sqlx::query_scalar("SELECT record::text FROM workflow_runs WHERE id = $1")
                .bind(run_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(unavailable)?;

        match row {
            Some(record) => Ok(Some(decode(&record)?)),
            None => Ok(None),
        }
    }

    async fn list_by_workflow(
        &self,
        workflow_id: WorkflowId,
        limit: usize,
    ) -> Result<Vec<RunRecord>, Report<RunStoreError>> {
        let rows: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT record::text
            FROM workflow_runs
            WHERE workflow_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(workflow_id.to_string())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(decode(&row)?);
        }
        Ok(records)
    }

    async fn purge_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, Report<RunStoreError>> {
        let result = sqlx::query(
            r#"
            DELETE FROM workflow_runs
            WHERE status = ANY($1) AND completed_at < $2
            "#,
        )
        .bind(terminal_statuses())
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(result.rows_affected())
    }
}
