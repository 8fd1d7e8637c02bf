//! Error types for the workflow crate.
//!
//! - `GraphError`: structural problems with a graph snapshot
//! - `RegistryError`: executor lookup failures
//! - `ConditionError`: condition expressions that cannot be evaluated
//! - `ConfigurationError`: preflight failures that stop a run before any node executes
//! - `RunStoreError`: run record persistence failures (wrapped in a `Report`)

use crate::node::NodeId;
use std::fmt;

/// Errors from graph construction and validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Two nodes share an id.
    DuplicateNode { node_id: NodeId },
    /// An edge references a node that is not in the graph.
    DanglingEdge { edge_id: String, node_id: NodeId },
    /// Graph contains a cycle through the listed nodes.
    CycleDetected { nodes: Vec<NodeId> },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateNode { node_id } => write!(f, "duplicate node id: {node_id}"),
            Self::DanglingEdge { edge_id, node_id } => {
                write!(f, "edge {edge_id} references unknown node {node_id}")
            }
            Self::CycleDetected { nodes } => {
                let nodes: Vec<_> = nodes.iter().map(NodeId::as_str).collect();
                write!(f, "graph contains a cycle through: {}", nodes.join(", "))
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// Errors from the node registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No executor is registered for the type.
    NotFound { type_id: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { type_id } => write!(f, "no executor registered for node type '{type_id}'"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Errors from evaluating a condition expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionError {
    /// A `matches` operand is not a valid regular expression.
    InvalidRegex { pattern: String, reason: String },
    /// The operator needs a right-hand operand that was not given.
    MissingOperand { operator: String },
}

impl fmt::Display for ConditionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRegex { pattern, reason } => {
                write!(f, "invalid regex '{pattern}': {reason}")
            }
            Self::MissingOperand { operator } => {
                write!(f, "operator '{operator}' requires a right operand")
            }
        }
    }
}

impl std::error::Error for ConditionError {}

/// Reasons a run fails before any node executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// The graph itself is invalid.
    Graph(GraphError),
    /// A node references an executor type nobody registered.
    UnknownNodeType { node_id: NodeId, type_id: String },
    /// A node's configuration is missing required parameters.
    InvalidNodeConfig { node_id: NodeId, errors: Vec<String> },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graph(err) => write!(f, "invalid graph: {err}"),
            Self::UnknownNodeType { node_id, type_id } => {
                write!(f, "node {node_id} has unknown type '{type_id}'")
            }
            Self::InvalidNodeConfig { node_id, errors } => {
                write!(f, "node {node_id} has invalid configuration: {}", errors.join("; "))
            }
        }
    }
}

impl std::error::Error for ConfigurationError {}

impl From<GraphError> for ConfigurationError {
    fn from(err: GraphError) -> Self {
        Self::Graph(err)
    }
}

/// Errors from run record persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStoreError {
    /// Backend could not be reached or rejected the operation.
    Unavailable { message: String },
    /// A stored record could not be encoded or decoded.
    Serialization { message: String },
}

impl fmt::Display for RunStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { message } => write!(f, "run store unavailable: {message}"),
            Self::Serialization { message } => write!(f, "run record serialization failed: {message}"),
        }
    }
}

impl std::error::Error for RunStoreError {}
