//! Run records.
//!
//! A [`RunRecord`] is the persisted, externally queryable state of one run.
//! It is created `Pending` when a run is enqueued, becomes `Running` when the
//! engine picks it up, and reaches exactly one terminal state.

use crate::node::{JsonMap, NodeId};
use crate::result::ExecutionResult;
use chrono::{DateTime, Utc};
use flowloom_core::{WorkflowId, WorkflowRunId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Enqueued, waiting for a worker.
    Pending,
    Running,
    Completed,
    Failed,
    /// Stopped at a node boundary after a cancellation request.
    Cancelled,
}

impl RunStatus {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Stable lowercase name, matching the serialized form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

/// Persisted state of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: WorkflowRunId,
    pub workflow_id: WorkflowId,
    pub status: RunStatus,
    pub input: JsonMap,
    pub output: Option<JsonMap>,
    pub error: Option<String>,
    /// Node whose failure ended the run.
    pub failed_node: Option<NodeId>,
    pub node_results: BTreeMap<NodeId, ExecutionResult>,
    pub execution_order: Vec<NodeId>,
    /// Nodes pruned because none of their incoming edges was taken.
    pub skipped_nodes: Vec<NodeId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    /// Creates a pending record.
    #[must_use]
    pub fn pending(id: WorkflowRunId, workflow_id: WorkflowId, input: JsonMap) -> Self {
        Self {
            id,
            workflow_id,
            status: RunStatus::Pending,
            input,
            output: None,
            error: None,
            failed_node: None,
            node_results: BTreeMap::new(),
            execution_order: Vec::new(),
            skipped_nodes: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Moves the record to `Running`, discarding results from any earlier
    /// attempt under the same id.
    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
        self.completed_at = None;
        self.output = None;
        self.error = None;
        self.failed_node = None;
        self.node_results.clear();
        self.execution_order.clear();
        self.skipped_nodes.clear();
    }

    /// Records a node's result in execution order.
    pub fn record_node(&mut self, node_id: NodeId, result: ExecutionResult) {
        self.execution_order.push(node_id.clone());
        self.node_results.insert(node_id, result);
    }

    pub fn record_skipped(&mut self, node_id: NodeId) {
        self.skipped_nodes.push(node_id);
    }

    /// Marks the run as completed. Ignored once terminal.
    pub fn complete(&mut self, output: JsonMap) {
        if self.finish(RunStatus::Completed) {
            self.output = Some(output);
        }
    }

    /// Marks the run as failed. Ignored once terminal.
    pub fn fail(&mut self, error: impl Into<String>, failed_node: Option<NodeId>) {
        if self.finish(RunStatus::Failed) {
            self.error = Some(error.into());
            self.failed_node = failed_node;
        }
    }

    /// Marks the run as cancelled, keeping the partial output. Ignored once terminal.
    pub fn cancel(&mut self, output: JsonMap) {
        if self.finish(RunStatus::Cancelled) {
            self.output = Some(output);
        }
    }

    fn finish(&mut self, status: RunStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.completed_at = Some(Utc::now());
        true
    }

    /// Wall time in milliseconds from start to completion (or now).
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        let Some(start) = self.started_at else {
            return 0;
        };
        let end = self.completed_at.unwrap_or_else(Utc::now);
        u64::try_from((end - start).num_milliseconds()).unwrap_or(0)
    }
}

/// What the engine hands back to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub run_id: WorkflowRunId,
    pub status: RunStatus,
    pub output: JsonMap,
    pub node_results: BTreeMap<NodeId, ExecutionResult>,
    pub execution_order: Vec<NodeId>,
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_node: Option<NodeId>,
}

impl From<&RunRecord> for RunResult {
    fn from(record: &RunRecord) -> Self {
        Self {
            run_id: record.id,
            status: record.status,
            output: record.output.clone().unwrap_or_default(),
            node_results: record.node_results.clone(),
            execution_order: record.execution_order.clone(),
            duration_ms: record.duration_ms(),
            error: record.error.clone(),
            failed_node: record.failed_node.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> RunRecord {
        RunRecord::pending(WorkflowRunId::new(), WorkflowId::new(), JsonMap::new())
    }

    #[test]
    fn status_terminal() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [RunStatus::Pending, RunStatus::Cancelled] {
            assert_eq!(status.as_str().parse::<RunStatus>(), Ok(status));
        }
        assert!("nope".parse::<RunStatus>().is_err());
    }

    #[test]
    fn lifecycle() {
        let mut run = record();
        assert_eq!(run.status, RunStatus::Pending);

        run.start();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.started_at.is_some());

        run.record_node("A".into(), ExecutionResult::success(JsonMap::new()));
        let mut output = JsonMap::new();
        output.insert("x".to_string(), json!(1));
        run.complete(output);

        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.completed_at.is_some());
        assert_eq!(run.execution_order, vec![NodeId::from("A")]);
    }

    #[test]
    fn terminal_state_is_set_once() {
        let mut run = record();
        run.start();
        run.fail("boom", Some("B".into()));
        run.complete(JsonMap::new());
        run.cancel(JsonMap::new());

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("boom"));
        assert_eq!(run.failed_node, Some(NodeId::from("B")));
        assert!(run.output.is_none());
    }

    #[test]
    fn restart_clears_previous_attempt() {
        let mut run = record();
        run.start();
        run.record_node("A".into(), ExecutionResult::failure("x"));
        run.fail("x", Some("A".into()));

        run.start();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.node_results.is_empty());
        assert!(run.error.is_none());
    }

    #[test]
    fn result_wire_format() {
        let mut run = record();
        run.start();
        run.complete(JsonMap::new());
        let json = serde_json::to_value(RunResult::from(&run)).expect("serialize");
        assert_eq!(json["status"], "completed");
        assert!(json.get("nodeResults").is_some());
        assert!(json.get("executionOrder").is_some());
        assert!(json.get("duration").is_some());
        assert!(json.get("error").is_none());
    }
}
