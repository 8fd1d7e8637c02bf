//! Shared handler state.

use flowloom_queue::{InMemoryWorkflowSource, RunQueue};
use flowloom_scheduler::{ChangeWatcher, TriggerScheduler};
use flowloom_workflow::WorkflowEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything handlers need. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
    pub run_queue: RunQueue,
    /// Graphs registered for queued and triggered runs.
    pub workflows: InMemoryWorkflowSource,
    pub scheduler: Arc<TriggerScheduler>,
    /// Present only when a database is configured.
    pub watcher: Option<Arc<ChangeWatcher>>,
    pub ping_interval: Duration,
    pub default_watch_poll_interval_ms: u64,
    /// Cancelled on shutdown; ends open event streams.
    pub shutdown: CancellationToken,
}
