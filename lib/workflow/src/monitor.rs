//! Live run monitoring.
//!
//! Listeners subscribe to a run id and receive every lifecycle event the
//! engine emits for that run. A run may have any number of listeners; each
//! event is fanned out to all of them. A listener whose consumer has gone
//! away is dropped on the first failed delivery.

use crate::node::NodeId;
use crate::run::RunStatus;
use chrono::{DateTime, Utc};
use flowloom_core::{ListenerId, WorkflowId, WorkflowRunId};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tracing::debug;

/// Kind of a monitor event. Serialized names are what stream clients see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MonitorEventType {
    Connected,
    RunStart,
    NodeStart,
    NodeComplete,
    NodeError,
    NodeSkipped,
    RunComplete,
    Ping,
}

impl MonitorEventType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::RunStart => "runStart",
            Self::NodeStart => "nodeStart",
            Self::NodeComplete => "nodeComplete",
            Self::NodeError => "nodeError",
            Self::NodeSkipped => "nodeSkipped",
            Self::RunComplete => "runComplete",
            Self::Ping => "ping",
        }
    }
}

/// An event delivered to listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorEvent {
    pub run_id: WorkflowRunId,
    #[serde(rename = "type")]
    pub event_type: MonitorEventType,
    pub payload: JsonValue,
    pub timestamp: DateTime<Utc>,
}

impl MonitorEvent {
    #[must_use]
    pub fn new(run_id: WorkflowRunId, event_type: MonitorEventType, payload: JsonValue) -> Self {
        Self {
            run_id,
            event_type,
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Returned by a sink whose consumer is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

/// Receives monitor events for one listener.
pub trait EventSink: Send + Sync {
    /// Delivers an event without blocking the engine.
    ///
    /// # Errors
    ///
    /// Returns [`SinkClosed`] once the consumer has disconnected.
    fn send(&self, event: &MonitorEvent) -> Result<(), SinkClosed>;
}

impl EventSink for mpsc::UnboundedSender<MonitorEvent> {
    fn send(&self, event: &MonitorEvent) -> Result<(), SinkClosed> {
        mpsc::UnboundedSender::send(self, event.clone()).map_err(|_| SinkClosed)
    }
}

/// Snapshot of a run that is currently executing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveRun {
    pub run_id: WorkflowRunId,
    pub workflow_id: WorkflowId,
    pub current_node: Option<NodeId>,
    pub completed_nodes: usize,
    pub failed_nodes: usize,
    pub started_at: DateTime<Utc>,
}

type Listeners = HashMap<WorkflowRunId, Vec<(ListenerId, Arc<dyn EventSink>)>>;

#[derive(Default)]
struct MonitorInner {
    listeners: RwLock<Listeners>,
    live: RwLock<HashMap<WorkflowRunId, LiveRun>>,
}

/// Fan-out hub between the engine and run observers. Cheap to clone.
#[derive(Clone, Default)]
pub struct ExecutionMonitor {
    inner: Arc<MonitorInner>,
}

impl ExecutionMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a listener to a run and immediately sends it a `connected`
    /// event.
    pub async fn register_listener(
        &self,
        run_id: WorkflowRunId,
        sink: Arc<dyn EventSink>,
    ) -> ListenerId {
        let listener_id = ListenerId::new();
        let connected = MonitorEvent::new(
            run_id,
            MonitorEventType::Connected,
            json!({ "runId": run_id, "listenerId": listener_id }),
        );
        if sink.send(&connected).is_err() {
            return listener_id;
        }

        self.inner
            .listeners
            .write()
            .await
            .entry(run_id)
            .or_default()
            .push((listener_id, sink));
        debug!(run_id = %run_id, listener_id = %listener_id, "listener registered");
        listener_id
    }

    /// Removes every listener of a run. No-op if there are none.
    pub async fn unregister_listener(&self, run_id: WorkflowRunId) {
        self.inner.listeners.write().await.remove(&run_id);
    }

    /// Removes one listener. No-op if it is not registered.
    pub async fn remove_listener(&self, run_id: WorkflowRunId, listener_id: ListenerId) {
        let mut listeners = self.inner.listeners.write().await;
        if let Some(sinks) = listeners.get_mut(&run_id) {
            sinks.retain(|(id, _)| *id != listener_id);
            if sinks.is_empty() {
                listeners.remove(&run_id);
            }
        }
    }

    /// Number of listeners attached to a run.
    pub async fn listener_count(&self, run_id: WorkflowRunId) -> usize {
        self.inner
            .listeners
            .read()
            .await
            .get(&run_id)
            .map_or(0, Vec::len)
    }

    /// Sends an event to every listener of the run.
    pub async fn emit(&self, run_id: WorkflowRunId, event_type: MonitorEventType, payload: JsonValue) {
        let event = MonitorEvent::new(run_id, event_type, payload);

        let closed: Vec<ListenerId> = {
            let listeners = self.inner.listeners.read().await;
            let Some(sinks) = listeners.get(&run_id) else {
                return;
            };
            sinks
                .iter()
                .filter(|(_, sink)| sink.send(&event).is_err())
                .map(|(id, _)| *id)
                .collect()
        };

        for listener_id in closed {
            debug!(run_id = %run_id, listener_id = %listener_id, "dropping disconnected listener");
            self.remove_listener(run_id, listener_id).await;
        }
    }

    /// Live state of a running run.
    pub async fn live_run(&self, run_id: WorkflowRunId) -> Option<LiveRun> {
        self.inner.live.read().await.get(&run_id).cloned()
    }

    /// Every run currently executing.
    pub async fn active_runs(&self) -> Vec<LiveRun> {
        let mut runs: Vec<_> = self.inner.live.read().await.values().cloned().collect();
        runs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        runs
    }

    pub(crate) async fn run_started(&self, run_id: WorkflowRunId, workflow_id: WorkflowId) {
        self.inner.live.write().await.insert(
            run_id,
            LiveRun {
                run_id,
                workflow_id,
                current_node: None,
                completed_nodes: 0,
                failed_nodes: 0,
                started_at: Utc::now(),
            },
        );
        self.emit(
            run_id,
            MonitorEventType::RunStart,
            json!({ "runId": run_id, "workflowId": workflow_id }),
        )
        .await;
    }

    pub(crate) async fn node_started(&self, run_id: WorkflowRunId, node_id: &NodeId, type_id: &str) {
        if let Some(live) = self.inner.live.write().await.get_mut(&run_id) {
            live.current_node = Some(node_id.clone());
        }
        self.emit(
            run_id,
            MonitorEventType::NodeStart,
            json!({ "nodeId": node_id, "typeId": type_id }),
        )
        .await;
    }

    pub(crate) async fn node_finished(
        &self,
        run_id: WorkflowRunId,
        node_id: &NodeId,
        result: &crate::result::ExecutionResult,
    ) {
        if let Some(live) = self.inner.live.write().await.get_mut(&run_id) {
            live.current_node = None;
            if result.success {
                live.completed_nodes += 1;
            } else {
                live.failed_nodes += 1;
            }
        }

        let (event_type, payload) = if result.success {
            (
                MonitorEventType::NodeComplete,
                json!({
                    "nodeId": node_id,
                    "output": result.output,
                    "branch": result.branch,
                    "duration": result.duration_ms,
                }),
            )
        } else {
            (
                MonitorEventType::NodeError,
                json!({
                    "nodeId": node_id,
                    "error": result.error_message(),
                    "duration": result.duration_ms,
                }),
            )
        };
        self.emit(run_id, event_type, payload).await;
    }

    pub(crate) async fn node_skipped(&self, run_id: WorkflowRunId, node_id: &NodeId) {
        self.emit(run_id, MonitorEventType::NodeSkipped, json!({ "nodeId": node_id }))
            .await;
    }

    pub(crate) async fn run_finished(
        &self,
        run_id: WorkflowRunId,
        status: RunStatus,
        error: Option<&str>,
        failed_node: Option<&NodeId>,
    ) {
        self.inner.live.write().await.remove(&run_id);
        self.emit(
            run_id,
            MonitorEventType::RunComplete,
            json!({ "status": status, "error": error, "failedNode": failed_node }),
        )
        .await;
    }
}

impl std::fmt::Debug for ExecutionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionMonitor").finish_non_exhaustive()
    }
}
