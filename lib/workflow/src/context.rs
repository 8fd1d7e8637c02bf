//! Per-run execution context.
//!
//! The engine owns one context for the whole run and updates it between
//! nodes. Executors only ever see a shared borrow for the duration of their
//! call.

use crate::node::{JsonMap, NodeId};
use flowloom_core::{AgentId, SessionId, UserId, WorkflowId, WorkflowRunId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Key under which other nodes' outputs are visible to condition paths.
pub const NODE_SCOPE_KEY: &str = "$node";

/// State threaded through a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub run_id: WorkflowRunId,
    pub workflow_id: WorkflowId,
    /// Node currently executing.
    pub node_id: Option<NodeId>,
    /// Effective input of the current node.
    pub input: JsonMap,
    /// Accumulated output of every completed node, last write wins.
    pub output: JsonMap,
    /// Output of each completed node keyed by node id.
    pub variables: JsonMap,
    /// Opaque credential material keyed by credential name.
    #[serde(skip_serializing, default)]
    pub credentials: JsonMap,
    pub user_id: Option<UserId>,
    pub session_id: Option<SessionId>,
    pub agent_id: Option<AgentId>,
}

impl ExecutionContext {
    /// Creates an empty context for a run.
    #[must_use]
    pub fn new(run_id: WorkflowRunId, workflow_id: WorkflowId) -> Self {
        Self {
            run_id,
            workflow_id,
            node_id: None,
            input: JsonMap::new(),
            output: JsonMap::new(),
            variables: JsonMap::new(),
            credentials: JsonMap::new(),
            user_id: None,
            session_id: None,
            agent_id: None,
        }
    }

    /// Points the context at the next node and replaces its input.
    pub fn enter(&mut self, node_id: NodeId, input: JsonMap) {
        self.node_id = Some(node_id);
        self.input = input;
    }

    /// Merges a completed node's output into the accumulated output and
    /// records it under the node's id.
    pub fn merge_output(&mut self, node_id: &NodeId, output: &JsonMap) {
        for (key, value) in output {
            self.output.insert(key.clone(), value.clone());
        }
        self.variables
            .insert(node_id.to_string(), JsonValue::Object(output.clone()));
    }

    /// Output previously produced by a node in this run.
    #[must_use]
    pub fn node_output(&self, node_id: &NodeId) -> Option<&JsonMap> {
        self.variables.get(node_id.as_str())?.as_object()
    }

    /// Looks up a credential by name.
    #[must_use]
    pub fn credential(&self, name: &str) -> Option<&JsonValue> {
        self.credentials.get(name)
    }

    /// Data visible to condition expressions: the current input plus every
    /// completed node's output under `$node`.
    #[must_use]
    pub fn scope(&self) -> JsonValue {
        let mut scope = self.input.clone();
        scope.insert(
            NODE_SCOPE_KEY.to_string(),
            JsonValue::Object(self.variables.clone()),
        );
        JsonValue::Object(scope)
    }
}
