//! Queue worker that turns jobs into workflow runs.

use crate::error::QueueError;
use crate::job::{Delivery, JobQueue};
use crate::source::WorkflowSource;
use flowloom_workflow::{RunOptions, RunRecord, WorkflowEngine};
use rootcause::Report;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Worker tuning.
#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// Runs executing at once.
    pub concurrency: usize,
    /// Wait between fetches when the queue is empty or failing.
    pub poll_interval: Duration,
    /// Delay before a job is retried after a transient lookup failure.
    pub retry_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_millis(500),
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Pulls jobs from a [`JobQueue`] and runs them through the engine.
///
/// A job is acked only after the engine has returned, so a worker that
/// dies mid-run leaves the job to be redelivered.
pub struct QueueWorker {
    queue: Arc<dyn JobQueue>,
    engine: Arc<WorkflowEngine>,
    workflows: Arc<dyn WorkflowSource>,
    config: WorkerConfig,
    semaphore: Arc<Semaphore>,
}

impl QueueWorker {
    #[must_use]
    pub fn new(
        queue: Arc<dyn JobQueue>,
        engine: Arc<WorkflowEngine>,
        workflows: Arc<dyn WorkflowSource>,
        config: WorkerConfig,
    ) -> Self {
        let concurrency = config.concurrency.max(1);
        Self {
            queue,
            engine,
            workflows,
            config: WorkerConfig {
                concurrency,
                ..config
            },
            semaphore: Arc::new(Semaphore::new(concurrency)),
        }
    }

    /// Spawns [`Self::run`] on the runtime.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Fetches and runs jobs until `shutdown` fires, then waits for the
    /// runs already in progress.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(concurrency = self.config.concurrency, "queue worker started");

        loop {
            let permit = tokio::select! {
                biased;

                () = shutdown.cancelled() => break,
                permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        error!("worker semaphore closed, stopping");
                        break;
                    }
                },
            };

            match self.queue.fetch().await {
                Ok(Some(delivery)) => {
                    let worker = Arc::clone(&self);
                    tokio::spawn(async move {
                        worker.process(delivery).await;
                        drop(permit);
                    });
                    continue;
                }
                Ok(None) => drop(permit),
                Err(report) => {
                    warn!(error = %report, "failed to fetch job");
                    drop(permit);
                }
            }

            tokio::select! {
                biased;

                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!("queue worker stopping, waiting for in-flight runs");
        let all = u32::try_from(self.config.concurrency).unwrap_or(u32::MAX);
        if self.semaphore.acquire_many(all).await.is_err() {
            warn!("worker semaphore closed while draining");
        }
        info!("queue worker stopped");
    }

    /// Fetches one job and processes it inline. Returns false if the queue
    /// had nothing ready.
    ///
    /// # Errors
    ///
    /// Returns an error if the fetch itself fails.
    pub async fn process_next(&self) -> Result<bool, Report<QueueError>> {
        match self.queue.fetch().await? {
            Some(delivery) => {
                self.process(delivery).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn process(&self, delivery: Delivery) {
        let job = delivery.job.clone();
        let span = info_span!(
            "queue_job",
            job_id = %job.id,
            run_id = %job.run_id,
            workflow_id = %job.workflow_id,
            attempt = job.attempts
        );

        async move {
            let graph = match self.workflows.workflow(job.workflow_id).await {
                Ok(Some(graph)) => graph,
                Ok(None) => {
                    warn!("workflow not found, failing run");
                    self.fail_missing_workflow(&job).await;
                    settle(delivery.ack().await);
                    return;
                }
                Err(report) => {
                    warn!(error = %report, "workflow lookup failed, retrying job");
                    settle(delivery.retry(self.config.retry_delay).await);
                    return;
                }
            };

            let options = RunOptions::default()
                .with_run_id(job.run_id)
                .with_workflow_id(job.workflow_id);
            let result = self
                .engine
                .execute_workflow(&graph, job.payload.clone(), options)
                .await;
            debug!(status = %result.status, duration_ms = result.duration_ms, "job run returned");

            settle(delivery.ack().await);
        }
        .instrument(span)
        .await;
    }

    async fn fail_missing_workflow(&self, job: &crate::job::QueueJob) {
        let runs = self.engine.runs();
        let mut record = match runs.get(job.run_id).await {
            Ok(Some(record)) => record,
            Ok(None) => RunRecord::pending(job.run_id, job.workflow_id, job.payload.clone()),
            Err(report) => {
                warn!(error = %report, "failed to load run record");
                RunRecord::pending(job.run_id, job.workflow_id, job.payload.clone())
            }
        };
        record.fail(format!("workflow {} not found", job.workflow_id), None);
        if let Err(report) = runs.save(&record).await {
            warn!(error = %report, "failed to persist failed run record");
        }
    }
}

fn settle(result: Result<(), Report<QueueError>>) {
    if let Err(report) = result {
        warn!(error = %report, "failed to settle job, it will be redelivered");
    }
}

impl std::fmt::Debug for QueueWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueWorker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobOptions;
    use crate::memory::InMemoryJobQueue;
    use crate::run_queue::RunQueue;
    use crate::source::InMemoryWorkflowSource;
    use flowloom_core::WorkflowId;
    use flowloom_workflow::nodes::register_builtin;
    use flowloom_workflow::{
        Edge, InMemoryRunStore, JsonMap, Node, NodeRegistry, RunStatus, RunStore, WorkflowGraph,
    };
    use serde_json::json;

    struct Harness {
        queue: Arc<InMemoryJobQueue>,
        runs: Arc<InMemoryRunStore>,
        workflows: InMemoryWorkflowSource,
        run_queue: RunQueue,
        worker: Arc<QueueWorker>,
    }

    fn harness() -> Harness {
        let mut registry = NodeRegistry::new();
        register_builtin(&mut registry);
        let queue = Arc::new(InMemoryJobQueue::new(Duration::from_secs(30)));
        let runs = Arc::new(InMemoryRunStore::new());
        let engine = Arc::new(WorkflowEngine::new(Arc::new(registry), runs.clone()));
        let workflows = InMemoryWorkflowSource::new();
        let worker = Arc::new(QueueWorker::new(
            queue.clone(),
            engine,
            Arc::new(workflows.clone()),
            WorkerConfig {
                poll_interval: Duration::from_millis(10),
                ..WorkerConfig::default()
            },
        ));
        Harness {
            run_queue: RunQueue::new(queue.clone(), runs.clone()),
            queue,
            runs,
            workflows,
            worker,
        }
    }

    fn greeting_graph() -> WorkflowGraph {
        let mut values = JsonMap::new();
        values.insert("greeting".to_string(), json!("hello"));
        let mut config = JsonMap::new();
        config.insert("values".to_string(), json!(values));

        let mut graph = WorkflowGraph::new();
        graph
            .add_node(Node::new("start", "trigger.manual"))
            .expect("start");
        graph
            .add_node(Node::new("set", "data.set").with_config(config))
            .expect("set");
        graph.add_edge(Edge::new("start", "set")).expect("edge");
        graph
    }

    #[tokio::test]
    async fn processes_job_with_queued_run_id() {
        let h = harness();
        let workflow_id = WorkflowId::new();
        h.workflows.put(workflow_id, greeting_graph()).await;

        let mut payload = JsonMap::new();
        payload.insert("who".to_string(), json!("world"));
        let job = h
            .run_queue
            .add_job(workflow_id, payload, JobOptions::default())
            .await
            .expect("add job");

        assert!(h.worker.process_next().await.expect("process"));
        let record = h.runs.get(job.run_id).await.expect("get").expect("record");
        assert_eq!(record.status, RunStatus::Completed);
        let output = record.output.expect("output");
        assert_eq!(output.get("greeting"), Some(&json!("hello")));
        assert_eq!(output.get("who"), Some(&json!("world")));
        assert_eq!(h.queue.in_flight().await, 0);
        assert_eq!(h.runs.len().await, 1);
    }

    #[tokio::test]
    async fn missing_workflow_fails_run_and_acks() {
        let h = harness();
        let job = h
            .run_queue
            .add_job(WorkflowId::new(), JsonMap::new(), JobOptions::default())
            .await
            .expect("add job");

        assert!(h.worker.process_next().await.expect("process"));
        let record = h.runs.get(job.run_id).await.expect("get").expect("record");
        assert_eq!(record.status, RunStatus::Failed);
        assert!(record.error.expect("error").contains("not found"));
        assert_eq!(h.queue.in_flight().await, 0);
        assert_eq!(h.queue.pending().await, 0);
    }

    #[tokio::test]
    async fn empty_queue_reports_nothing_processed() {
        let h = harness();
        assert!(!h.worker.process_next().await.expect("process"));
    }

    #[tokio::test]
    async fn run_loop_drains_queue_and_stops_on_shutdown() {
        let h = harness();
        let workflow_id = WorkflowId::new();
        h.workflows.put(workflow_id, greeting_graph()).await;

        let mut run_ids = Vec::new();
        for _ in 0..3 {
            let job = h
                .run_queue
                .add_job(workflow_id, JsonMap::new(), JobOptions::default())
                .await
                .expect("add job");
            run_ids.push(job.run_id);
        }

        let shutdown = CancellationToken::new();
        let handle = Arc::clone(&h.worker).spawn(shutdown.clone());

        for _ in 0..100 {
            if h.queue.pending().await == 0 && h.queue.in_flight().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        handle.await.expect("worker task");

        for run_id in run_ids {
            let record = h.runs.get(run_id).await.expect("get").expect("record");
            assert_eq!(record.status, RunStatus::Completed);
        }
    }
}
