//! Jobs, job options and the queue contract.

use crate::error::QueueError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowloom_core::{JobId, WorkflowId, WorkflowRunId};
use flowloom_workflow::JsonMap;
use rootcause::Report;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Job priority. Higher priorities are delivered first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl JobPriority {
    pub const ALL: [Self; 4] = [Self::Critical, Self::High, Self::Normal, Self::Low];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options accepted by [`crate::RunQueue::add_job`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    #[serde(default)]
    pub priority: JobPriority,
    /// Delay before the job becomes visible, in milliseconds on the wire.
    #[serde(default, rename = "delay", with = "delay_ms")]
    pub delay: Option<Duration>,
}

impl JobOptions {
    #[must_use]
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

mod delay_ms {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

/// A queued request to run one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueJob {
    pub id: JobId,
    pub workflow_id: WorkflowId,
    /// Fixed at enqueue time so redeliveries overwrite the same run record.
    pub run_id: WorkflowRunId,
    pub payload: JsonMap,
    pub priority: JobPriority,
    pub enqueued_at: DateTime<Utc>,
    pub available_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
}

impl QueueJob {
    #[must_use]
    pub fn new(workflow_id: WorkflowId, payload: JsonMap, options: JobOptions) -> Self {
        let now = Utc::now();
        let delay = options
            .delay
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .unwrap_or_else(chrono::Duration::zero);
        Self {
            id: JobId::new(),
            workflow_id,
            run_id: WorkflowRunId::new(),
            payload,
            priority: options.priority,
            enqueued_at: now,
            available_at: now + delay,
            attempts: 0,
        }
    }

    /// Whether the job's delay has elapsed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.available_at <= Utc::now()
    }

    /// Time left before the job becomes visible.
    #[must_use]
    pub fn remaining_delay(&self) -> Duration {
        (self.available_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Backend-specific settlement of a fetched job.
#[async_trait]
pub trait AckHandle: Send {
    /// Removes the job from the queue.
    async fn ack(self: Box<Self>) -> Result<(), Report<QueueError>>;

    /// Returns the job to the queue, visible again after `delay`.
    async fn retry(self: Box<Self>, delay: Duration) -> Result<(), Report<QueueError>>;
}

/// A fetched job together with the means to settle it.
///
/// Dropping a delivery without settling leaves the job in flight; the
/// backend redelivers it after its visibility timeout.
pub struct Delivery {
    pub job: QueueJob,
    handle: Box<dyn AckHandle>,
}

impl Delivery {
    #[must_use]
    pub fn new(job: QueueJob, handle: Box<dyn AckHandle>) -> Self {
        Self { job, handle }
    }

    /// Acknowledges the job.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the acknowledgement.
    pub async fn ack(self) -> Result<(), Report<QueueError>> {
        self.handle.ack().await
    }

    /// Puts the job back after `delay`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the request.
    pub async fn retry(self, delay: Duration) -> Result<(), Report<QueueError>> {
        self.handle.retry(delay).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery").field("job", &self.job).finish_non_exhaustive()
    }
}

/// A durable job queue with at-least-once delivery.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueues a job.
    async fn push(&self, job: QueueJob) -> Result<(), Report<QueueError>>;

    /// Returns the next ready job, or `None` if nothing is ready.
    async fn fetch(&self) -> Result<Option<Delivery>, Report<QueueError>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn priorities_order_low_to_critical() {
        assert!(JobPriority::Critical > JobPriority::High);
        assert!(JobPriority::High > JobPriority::Normal);
        assert!(JobPriority::Normal > JobPriority::Low);
        assert_eq!(JobPriority::default(), JobPriority::Normal);
    }

    #[test]
    fn undelayed_job_is_ready() {
        let job = QueueJob::new(WorkflowId::new(), JsonMap::new(), JobOptions::default());
        assert!(job.is_ready());
        assert_eq!(job.remaining_delay(), Duration::ZERO);
    }

    #[test]
    fn delayed_job_is_not_ready() {
        let options = JobOptions::default().with_delay(Duration::from_secs(60));
        let job = QueueJob::new(WorkflowId::new(), JsonMap::new(), options);
        assert!(!job.is_ready());
        assert!(job.remaining_delay() > Duration::from_secs(50));
    }

    #[test]
    fn options_parse_delay_in_millis() {
        let options: JobOptions =
            serde_json::from_value(json!({"priority": "high", "delay": 1500})).expect("parse");
        assert_eq!(options.priority, JobPriority::High);
        assert_eq!(options.delay, Some(Duration::from_millis(1500)));
    }
}
