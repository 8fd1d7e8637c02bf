//! Node types for workflow graphs.
//!
//! A node is one step of a workflow: a reference to an executor type plus the
//! static configuration that executor receives. Node ids are chosen by the
//! graph author and only need to be unique within one graph.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// JSON object used for node configuration, inputs and outputs.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Identifier of a node, unique within its graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node id from any string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A node in a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique identifier within the graph.
    pub id: NodeId,
    /// Registered executor type, e.g. `data.set`.
    pub type_id: String,
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Static configuration overlaid onto the node's input.
    #[serde(default)]
    pub config: JsonMap,
    /// When set, a failure of this node is recorded but does not stop the run.
    #[serde(default)]
    pub continue_on_fail: bool,
}

impl Node {
    /// Creates a node with an empty configuration.
    #[must_use]
    pub fn new(id: impl Into<NodeId>, type_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_id: type_id.into(),
            name: None,
            config: JsonMap::new(),
            continue_on_fail: false,
        }
    }

    /// Sets the node configuration.
    #[must_use]
    pub fn with_config(mut self, config: JsonMap) -> Self {
        self.config = config;
        self
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Marks the node as non-critical.
    #[must_use]
    pub fn continue_on_fail(mut self) -> Self {
        self.continue_on_fail = true;
        self
    }

    /// Returns the display name, falling back to the id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }

    /// Returns a single configuration value.
    #[must_use]
    pub fn config_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.config.get(key)
    }
}

/// A directed connection between two nodes.
///
/// An edge with a `condition` is only followed when the source node's result
/// selected the branch of the same name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    /// Edge identifier; generated from the endpoints when omitted.
    #[serde(default)]
    pub id: String,
    /// Node the edge leaves.
    pub source_id: NodeId,
    /// Node the edge enters.
    pub target_id: NodeId,
    /// Branch name that must be selected by the source for this edge to fire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl Edge {
    /// Creates an unconditional edge.
    #[must_use]
    pub fn new(source_id: impl Into<NodeId>, target_id: impl Into<NodeId>) -> Self {
        let source_id = source_id.into();
        let target_id = target_id.into();
        Self {
            id: format!("{source_id}->{target_id}"),
            source_id,
            target_id,
            condition: None,
        }
    }

    /// Restricts the edge to a branch selected by the source node.
    #[must_use]
    pub fn on_branch(mut self, branch: impl Into<String>) -> Self {
        self.condition = Some(branch.into());
        self
    }
}
