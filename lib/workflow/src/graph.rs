//! Workflow graph implementation using petgraph.
//!
//! A graph is an immutable-per-run snapshot of nodes and edges. Node
//! insertion order is preserved in petgraph's node indices and is used to
//! break ties when computing the execution order.

use crate::error::GraphError;
use crate::node::{Edge, Node, NodeId};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Wire form of a workflow graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSpec {
    /// Nodes in declaration order.
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Edges in declaration order.
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// A workflow graph using petgraph's directed graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "GraphSpec", into = "GraphSpec")]
pub struct WorkflowGraph {
    graph: DiGraph<Node, Edge>,
    node_index_map: HashMap<NodeId, NodeIndex>,
}

impl WorkflowGraph {
    /// Creates a new empty workflow graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            node_index_map: HashMap::new(),
        }
    }

    /// Builds a graph from nodes and edges, checking that ids are unique and
    /// that every edge references existing nodes.
    ///
    /// Cycles are accepted here and reported by [`WorkflowGraph::validate`].
    ///
    /// # Errors
    ///
    /// Returns the first duplicate node or dangling edge found.
    pub fn from_parts(nodes: Vec<Node>, edges: Vec<Edge>) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for node in nodes {
            graph.add_node(node)?;
        }
        for edge in edges {
            graph.add_edge(edge)?;
        }
        Ok(graph)
    }

    /// Adds a node to the graph.
    ///
    /// # Errors
    ///
    /// Returns an error if a node with the same id already exists.
    pub fn add_node(&mut self, node: Node) -> Result<NodeId, GraphError> {
        if self.node_index_map.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode { node_id: node.id });
        }
        let node_id = node.id.clone();
        let index = self.graph.add_node(node);
        self.node_index_map.insert(node_id.clone(), index);
        Ok(node_id)
    }

    /// Adds an edge between two existing nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if either endpoint is missing from the graph.
    pub fn add_edge(&mut self, mut edge: Edge) -> Result<(), GraphError> {
        let source = self.index_of(&edge.source_id).ok_or_else(|| GraphError::DanglingEdge {
            edge_id: edge.id.clone(),
            node_id: edge.source_id.clone(),
        })?;
        let target = self.index_of(&edge.target_id).ok_or_else(|| GraphError::DanglingEdge {
            edge_id: edge.id.clone(),
            node_id: edge.target_id.clone(),
        })?;
        if edge.id.is_empty() {
            edge.id = format!("{}->{}", edge.source_id, edge.target_id);
        }
        self.graph.add_edge(source, target, edge);
        Ok(())
    }

    fn index_of(&self, node_id: &NodeId) -> Option<NodeIndex> {
        self.node_index_map.get(node_id).copied()
    }

    /// Returns a reference to a node by its ID.
    #[must_use]
    pub fn node(&self, node_id: &NodeId) -> Option<&Node> {
        self.graph.node_weight(self.index_of(node_id)?)
    }

    /// Returns all nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    /// Returns all edges in declaration order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.graph.edge_weights()
    }

    /// Returns the number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of edges in the graph.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns true if the node has no incoming edges.
    #[must_use]
    pub fn is_entry(&self, node_id: &NodeId) -> bool {
        self.index_of(node_id).is_some_and(|idx| {
            self.graph
                .edges_directed(idx, Direction::Incoming)
                .next()
                .is_none()
        })
    }

    /// Returns nodes that have no incoming edges (entry points).
    pub fn entry_nodes(&self) -> Vec<&Node> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .edges_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    /// Returns the successors (downstream nodes) of a given node.
    pub fn successors(&self, node_id: &NodeId) -> Vec<(&Node, &Edge)> {
        self.neighbors(node_id, Direction::Outgoing)
    }

    /// Returns the incoming edges of a node with their source nodes, in edge
    /// declaration order.
    pub fn predecessors(&self, node_id: &NodeId) -> Vec<(&Node, &Edge)> {
        self.neighbors(node_id, Direction::Incoming)
    }

    fn neighbors(&self, node_id: &NodeId, direction: Direction) -> Vec<(&Node, &Edge)> {
        let Some(index) = self.index_of(node_id) else {
            return Vec::new();
        };

        let mut edges: Vec<_> = self.graph.edges_directed(index, direction).collect();
        // petgraph walks adjacency lists newest first
        edges.sort_by_key(|edge| edge.id());
        edges
            .into_iter()
            .filter_map(|edge| {
                let other = match direction {
                    Direction::Incoming => edge.source(),
                    Direction::Outgoing => edge.target(),
                };
                Some((self.graph.node_weight(other)?, edge.weight()))
            })
            .collect()
    }

    /// Validates the workflow graph.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CycleDetected`] if the graph is not a DAG.
    pub fn validate(&self) -> Result<(), GraphError> {
        self.execution_order().map(|_| ())
    }

    /// Computes a topological execution order.
    ///
    /// Among nodes whose predecessors are all ordered, the one declared first
    /// goes next, so unrelated nodes run in declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CycleDetected`] naming the nodes left on a cycle.
    pub fn execution_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|idx| self.graph.edges_directed(idx, Direction::Incoming).count())
            .collect();

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(position, _)| Reverse(position))
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse(position)) = ready.pop() {
            let index = NodeIndex::new(position);
            order.push(self.graph[index].id.clone());
            for edge in self.graph.edges_directed(index, Direction::Outgoing) {
                let target = edge.target().index();
                in_degree[target] -= 1;
                if in_degree[target] == 0 {
                    ready.push(Reverse(target));
                }
            }
        }

        if order.len() == self.graph.node_count() {
            return Ok(order);
        }

        let nodes = self
            .graph
            .node_indices()
            .filter(|idx| in_degree[idx.index()] > 0)
            .map(|idx| self.graph[idx].id.clone())
            .collect();
        Err(GraphError::CycleDetected { nodes })
    }
}

impl Default for WorkflowGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<GraphSpec> for WorkflowGraph {
    type Error = GraphError;

    fn try_from(spec: GraphSpec) -> Result<Self, Self::Error> {
        Self::from_parts(spec.nodes, spec.edges)
    }
}

impl From<WorkflowGraph> for GraphSpec {
    fn from(graph: WorkflowGraph) -> Self {
        let (nodes, edges) = graph.graph.into_nodes_edges();
        Self {
            nodes: nodes.into_iter().map(|node| node.weight).collect(),
            edges: edges.into_iter().map(|edge| edge.weight).collect(),
        }
    }
}
