//! Enqueueing workflow runs.

use crate::error::QueueError;
use crate::job::{JobOptions, JobQueue, QueueJob};
use flowloom_core::WorkflowId;
use flowloom_workflow::{JsonMap, RunRecord, RunStore};
use rootcause::Report;
use std::sync::Arc;
use tracing::{info, warn};

/// Front door for every queued run.
///
/// A `Pending` run record is written before the job is pushed, so a run id
/// returned to a caller can always be looked up. If the push fails the
/// record is marked `Failed`, which leaves it to the retention sweep.
#[derive(Clone)]
pub struct RunQueue {
    queue: Arc<dyn JobQueue>,
    runs: Arc<dyn RunStore>,
}

impl RunQueue {
    #[must_use]
    pub fn new(queue: Arc<dyn JobQueue>, runs: Arc<dyn RunStore>) -> Self {
        Self { queue, runs }
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    /// Creates a pending run and enqueues it.
    ///
    /// # Errors
    ///
    /// Returns an error if the run record cannot be written or the job
    /// cannot be published.
    pub async fn add_job(
        &self,
        workflow_id: WorkflowId,
        payload: JsonMap,
        options: JobOptions,
    ) -> Result<QueueJob, Report<QueueError>> {
        let job = QueueJob::new(workflow_id, payload, options);
        let mut record = RunRecord::pending(job.run_id, workflow_id, job.payload.clone());
        self.runs
            .save(&record)
            .await
            .map_err(|report| QueueError::RunStore {
                message: report.to_string(),
            })?;

        if let Err(report) = self.queue.push(job.clone()).await {
            record.fail(format!("enqueue failed: {report}"), None);
            if let Err(save) = self.runs.save(&record).await {
                warn!(run_id = %job.run_id, error = %save, "failed to mark unqueued run as failed");
            }
            return Err(report);
        }
        info!(
            job_id = %job.id,
            run_id = %job.run_id,
            workflow_id = %workflow_id,
            priority = %job.priority,
            "run queued"
        );
        Ok(job)
    }
}

impl std::fmt::Debug for RunQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunQueue").finish_non_exhaustive()
    }
}
