//! Where fired triggers go.

use crate::error::SchedulerError;
use async_trait::async_trait;
use flowloom_core::{WorkflowId, WorkflowRunId};
use flowloom_queue::{JobOptions, RunQueue};
use flowloom_workflow::JsonMap;
use rootcause::Report;

/// Receives runs requested by schedules and change watches.
#[async_trait]
pub trait TriggerSink: Send + Sync {
    /// Requests a run of `workflow_id` with `payload` as its input.
    async fn trigger(
        &self,
        workflow_id: WorkflowId,
        payload: JsonMap,
    ) -> Result<WorkflowRunId, Report<SchedulerError>>;
}

#[async_trait]
impl TriggerSink for RunQueue {
    async fn trigger(
        &self,
        workflow_id: WorkflowId,
        payload: JsonMap,
    ) -> Result<WorkflowRunId, Report<SchedulerError>> {
        let job = self
            .add_job(workflow_id, payload, JobOptions::default())
            .await
            .map_err(|report| SchedulerError::EnqueueFailed {
                reason: report.to_string(),
            })?;
        Ok(job.run_id)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tokio::sync::mpsc;

    /// Sink that forwards every trigger to a channel.
    pub struct ChannelSink(pub mpsc::UnboundedSender<(WorkflowId, JsonMap)>);

    #[async_trait]
    impl TriggerSink for ChannelSink {
        async fn trigger(
            &self,
            workflow_id: WorkflowId,
            payload: JsonMap,
        ) -> Result<WorkflowRunId, Report<SchedulerError>> {
            self.0
                .send((workflow_id, payload))
                .map_err(|e| SchedulerError::EnqueueFailed {
                    reason: e.to_string(),
                })?;
            Ok(WorkflowRunId::new())
        }
    }

    pub fn channel_sink() -> (
        std::sync::Arc<ChannelSink>,
        mpsc::UnboundedReceiver<(WorkflowId, JsonMap)>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (std::sync::Arc::new(ChannelSink(tx)), rx)
    }
}
