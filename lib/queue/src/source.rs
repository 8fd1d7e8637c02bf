//! Lookup of workflow graphs by id.

use crate::error::QueueError;
use async_trait::async_trait;
use flowloom_core::WorkflowId;
use flowloom_workflow::WorkflowGraph;
use rootcause::Report;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Where the worker finds the graph for a queued job.
#[async_trait]
pub trait WorkflowSource: Send + Sync {
    /// Returns the current graph, or `None` if the workflow does not exist.
    async fn workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Option<Arc<WorkflowGraph>>, Report<QueueError>>;
}

/// Workflow graphs held in memory, replaced wholesale on update.
#[derive(Debug, Default, Clone)]
pub struct InMemoryWorkflowSource {
    graphs: Arc<RwLock<HashMap<WorkflowId, Arc<WorkflowGraph>>>>,
}

impl InMemoryWorkflowSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores or replaces a workflow's graph.
    pub async fn put(&self, workflow_id: WorkflowId, graph: WorkflowGraph) {
        self.graphs.write().await.insert(workflow_id, Arc::new(graph));
    }

    /// Returns true if the workflow existed.
    pub async fn remove(&self, workflow_id: WorkflowId) -> bool {
        self.graphs.write().await.remove(&workflow_id).is_some()
    }

    pub async fn contains(&self, workflow_id: WorkflowId) -> bool {
        self.graphs.read().await.contains_key(&workflow_id)
    }
}

#[async_trait]
impl WorkflowSource for InMemoryWorkflowSource {
    async fn workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Option<Arc<WorkflowGraph>>, Report<QueueError>> {
        Ok(self.graphs.read().await.get(&workflow_id).cloned())
    }
}
