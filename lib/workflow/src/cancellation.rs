//! External cancellation of in-flight runs.
//!
//! Each running run owns a [`CancellationToken`]. Cancelling only signals the
//! token; the engine checks it before every node, so a node that is already
//! executing always finishes.

use flowloom_core::WorkflowRunId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A run id's token plus the number of executions currently holding it.
/// A redelivered job can start a second execution of a run id before the
/// first one ends.
#[derive(Debug)]
struct Registration {
    token: CancellationToken,
    live: usize,
}

/// Tracks cancellation tokens of running runs. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ExecutionManager {
    tokens: Arc<Mutex<HashMap<WorkflowRunId, Registration>>>,
}

impl ExecutionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one execution of a run and returns its token.
    ///
    /// Executions of the same id share a token while it is uncancelled, so
    /// one cancel reaches all of them. An execution registered after a
    /// cancel gets a fresh token.
    pub async fn register(&self, run_id: WorkflowRunId) -> CancellationToken {
        let mut tokens = self.tokens.lock().await;
        let registration = tokens.entry(run_id).or_insert_with(|| Registration {
            token: CancellationToken::new(),
            live: 0,
        });
        if registration.token.is_cancelled() {
            registration.token = CancellationToken::new();
        }
        registration.live += 1;
        registration.token.clone()
    }

    /// Signals cancellation. Returns true if a live run was found.
    pub async fn cancel_execution(&self, run_id: WorkflowRunId) -> bool {
        let tokens = self.tokens.lock().await;
        match tokens.get(&run_id) {
            Some(registration) => {
                info!(run_id = %run_id, live = registration.live, "cancellation requested");
                registration.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Releases one execution of a run. The run is forgotten once its last
    /// execution finished.
    pub async fn finish(&self, run_id: WorkflowRunId) {
        let mut tokens = self.tokens.lock().await;
        if let Some(registration) = tokens.get_mut(&run_id) {
            registration.live = registration.live.saturating_sub(1);
            if registration.live == 0 {
                tokens.remove(&run_id);
            }
        }
    }

    pub async fn is_running(&self, run_id: WorkflowRunId) -> bool {
        self.tokens.lock().await.contains_key(&run_id)
    }

    /// Ids of every registered run.
    pub async fn running(&self) -> Vec<WorkflowRunId> {
        self.tokens.lock().await.keys().copied().collect()
    }
}
