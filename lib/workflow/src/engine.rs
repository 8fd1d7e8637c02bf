//! The workflow execution engine.
//!
//! One call to [`WorkflowEngine::execute_workflow`] drives one run from
//! start to a terminal state:
//!
//! 1. Preflight: cycle check, executor lookup, configuration validation.
//!    Any failure ends the run as `Failed` before a node executes.
//! 2. Walk the nodes in topological order (declaration order breaks ties).
//! 3. Before each node, skip it if none of its incoming edges was taken,
//!    then honour a pending cancellation.
//! 4. Execute the node with its effective input and merge the output into
//!    the run context.
//!
//! Nodes of one run never execute concurrently. Workflow-level failures are
//! reported in the returned [`RunResult`], never as an `Err`.

use crate::cancellation::ExecutionManager;
use crate::context::ExecutionContext;
use crate::error::ConfigurationError;
use crate::graph::WorkflowGraph;
use crate::monitor::ExecutionMonitor;
use crate::node::{JsonMap, Node, NodeId};
use crate::registry::NodeRegistry;
use crate::result::ExecutionResult;
use crate::run::{RunRecord, RunResult};
use crate::store::RunStore;
use flowloom_core::{AgentId, SessionId, UserId, WorkflowId, WorkflowRunId};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

/// Per-run options supplied by the caller.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
    /// Reusing an id overwrites the earlier record.
    pub run_id: Option<WorkflowRunId>,
    pub workflow_id: Option<WorkflowId>,
    pub user_id: Option<UserId>,
    pub session_id: Option<SessionId>,
    pub agent_id: Option<AgentId>,
    /// Credential material made available to executors by name.
    #[serde(default)]
    pub credentials: JsonMap,
}

impl RunOptions {
    #[must_use]
    pub fn with_run_id(mut self, run_id: WorkflowRunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    #[must_use]
    pub fn with_workflow_id(mut self, workflow_id: WorkflowId) -> Self {
        self.workflow_id = Some(workflow_id);
        self
    }

    #[must_use]
    pub fn with_user_id(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

enum Outcome {
    Completed,
    Cancelled,
    Failed { node_id: NodeId, error: String },
}

/// Executes workflow graphs.
pub struct WorkflowEngine {
    registry: Arc<NodeRegistry>,
    runs: Arc<dyn RunStore>,
    monitor: ExecutionMonitor,
    manager: ExecutionManager,
}

impl WorkflowEngine {
    /// Creates an engine with its own monitor and execution manager.
    #[must_use]
    pub fn new(registry: Arc<NodeRegistry>, runs: Arc<dyn RunStore>) -> Self {
        Self {
            registry,
            runs,
            monitor: ExecutionMonitor::new(),
            manager: ExecutionManager::new(),
        }
    }

    /// Shares an existing monitor.
    #[must_use]
    pub fn with_monitor(mut self, monitor: ExecutionMonitor) -> Self {
        self.monitor = monitor;
        self
    }

    /// Shares an existing execution manager.
    #[must_use]
    pub fn with_manager(mut self, manager: ExecutionManager) -> Self {
        self.manager = manager;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn runs(&self) -> &Arc<dyn RunStore> {
        &self.runs
    }

    #[must_use]
    pub fn monitor(&self) -> &ExecutionMonitor {
        &self.monitor
    }

    #[must_use]
    pub fn manager(&self) -> &ExecutionManager {
        &self.manager
    }

    /// Requests cancellation of a running run. Returns true if it was found.
    pub async fn cancel_execution(&self, run_id: WorkflowRunId) -> bool {
        self.manager.cancel_execution(run_id).await
    }

    /// Runs `graph` to completion, failure or cancellation.
    pub async fn execute_workflow(
        &self,
        graph: &WorkflowGraph,
        initial_input: JsonMap,
        options: RunOptions,
    ) -> RunResult {
        let run_id = options.run_id.unwrap_or_default();
        let workflow_id = options.workflow_id.unwrap_or_default();
        let span = info_span!("workflow_run", run_id = %run_id, workflow_id = %workflow_id);
        self.run(graph, initial_input, options, run_id, workflow_id)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        graph: &WorkflowGraph,
        initial_input: JsonMap,
        options: RunOptions,
        run_id: WorkflowRunId,
        workflow_id: WorkflowId,
    ) -> RunResult {
        let mut record = RunRecord::pending(run_id, workflow_id, initial_input.clone());
        if let Ok(Some(existing)) = self.runs.get(run_id).await {
            record.created_at = existing.created_at;
        }
        record.start();

        let order = match self.preflight(graph) {
            Ok(order) => order,
            Err(err) => {
                warn!(error = %err, "run rejected before execution");
                record.fail(err.to_string(), None);
                self.persist(&record).await;
                self.monitor
                    .run_finished(run_id, record.status, record.error.as_deref(), None)
                    .await;
                return RunResult::from(&record);
            }
        };

        self.persist(&record).await;
        let token = self.manager.register(run_id).await;
        self.monitor.run_started(run_id, workflow_id).await;
        info!(nodes = order.len(), "run started");

        let mut context = ExecutionContext::new(run_id, workflow_id);
        context.user_id = options.user_id;
        context.session_id = options.session_id;
        context.agent_id = options.agent_id;
        context.credentials = options.credentials;

        let outcome = self
            .execute_nodes(graph, &order, &initial_input, &mut context, &mut record, &token)
            .await;

        match outcome {
            Outcome::Completed => record.complete(context.output.clone()),
            Outcome::Cancelled => record.cancel(context.output.clone()),
            Outcome::Failed { node_id, error } => record.fail(error, Some(node_id)),
        }

        self.manager.finish(run_id).await;
        self.persist(&record).await;
        self.monitor
            .run_finished(
                run_id,
                record.status,
                record.error.as_deref(),
                record.failed_node.as_ref(),
            )
            .await;
        info!(
            status = %record.status,
            executed = record.execution_order.len(),
            skipped = record.skipped_nodes.len(),
            "run finished"
        );
        RunResult::from(&record)
    }

    fn preflight(&self, graph: &WorkflowGraph) -> Result<Vec<NodeId>, ConfigurationError> {
        let order = graph.execution_order()?;
        for node in graph.nodes() {
            if !self.registry.contains(&node.type_id) {
                return Err(ConfigurationError::UnknownNodeType {
                    node_id: node.id.clone(),
                    type_id: node.type_id.clone(),
                });
            }
            let report = self.registry.validate_config(&node.type_id, &node.config);
            if !report.valid {
                return Err(ConfigurationError::InvalidNodeConfig {
                    node_id: node.id.clone(),
                    errors: report.errors,
                });
            }
        }
        Ok(order)
    }

    async fn execute_nodes(
        &self,
        graph: &WorkflowGraph,
        order: &[NodeId],
        initial_input: &JsonMap,
        context: &mut ExecutionContext,
        record: &mut RunRecord,
        token: &CancellationToken,
    ) -> Outcome {
        let run_id = record.id;

        for node_id in order {
            let Some(node) = graph.node(node_id) else {
                continue;
            };

            if !is_reachable(graph, node, record) {
                debug!(node_id = %node_id, "skipping node, no incoming edge taken");
                record.record_skipped(node_id.clone());
                self.monitor.node_skipped(run_id, node_id).await;
                continue;
            }

            if token.is_cancelled() {
                info!(node_id = %node_id, "run cancelled before node");
                return Outcome::Cancelled;
            }

            let input = effective_input(graph, node, initial_input, context, record);
            context.enter(node_id.clone(), input);
            self.monitor.node_started(run_id, node_id, &node.type_id).await;

            let started = Instant::now();
            let result = match self.registry.execute(&node.type_id, node, context).await {
                Ok(result) => result,
                Err(err) => ExecutionResult::failure(err.to_string()),
            };
            let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            let result = result.with_duration_ms(elapsed);

            self.monitor.node_finished(run_id, node_id, &result).await;

            if result.success {
                debug!(node_id = %node_id, duration_ms = elapsed, "node completed");
                if let Some(output) = &result.output {
                    context.merge_output(node_id, output);
                }
                record.record_node(node_id.clone(), result);
                continue;
            }

            let error = result.error_message().to_string();
            record.record_node(node_id.clone(), result);
            if node.continue_on_fail {
                warn!(node_id = %node_id, error = %error, "non-critical node failed, continuing");
                continue;
            }
            warn!(node_id = %node_id, error = %error, "node failed");
            return Outcome::Failed {
                node_id: node_id.clone(),
                error,
            };
        }

        Outcome::Completed
    }

    async fn persist(&self, record: &RunRecord) {
        if let Err(report) = self.runs.save(record).await {
            warn!(run_id = %record.id, status = %record.status, error = %report, "failed to persist run record");
        }
    }
}

/// A node runs if it is an entry node or at least one incoming edge was taken.
///
/// Every predecessor precedes the node in topological order, so all of them
/// are resolved by the time this is asked.
fn is_reachable(graph: &WorkflowGraph, node: &Node, record: &RunRecord) -> bool {
    let incoming = graph.predecessors(&node.id);
    incoming.is_empty()
        || incoming
            .iter()
            .any(|(source, edge)| edge_taken(source, edge.condition.as_deref(), record))
}

fn edge_taken(source: &Node, condition: Option<&str>, record: &RunRecord) -> bool {
    let Some(result) = record.node_results.get(&source.id) else {
        // skipped or never reached
        return false;
    };
    if !result.success && !source.continue_on_fail {
        return false;
    }
    match condition {
        None => true,
        Some(branch) => result.branch.as_deref() == Some(branch),
    }
}

/// Initial input (entry nodes only), then the accumulated output, then the
/// outputs of predecessors whose edge was taken, then the node's own
/// configuration. Later layers win.
fn effective_input(
    graph: &WorkflowGraph,
    node: &Node,
    initial_input: &JsonMap,
    context: &ExecutionContext,
    record: &RunRecord,
) -> JsonMap {
    let mut input = JsonMap::new();
    let incoming = graph.predecessors(&node.id);

    if incoming.is_empty() {
        extend(&mut input, initial_input);
    }
    extend(&mut input, &context.output);
    for (source, edge) in incoming {
        if !edge_taken(source, edge.condition.as_deref(), record) {
            continue;
        }
        if let Some(output) = context.node_output(&source.id) {
            extend(&mut input, output);
        }
    }
    extend(&mut input, &node.config);
    input
}

fn extend(target: &mut JsonMap, source: &JsonMap) {
    for (key, value) in source {
        target.insert(key.clone(), value.clone());
    }
}
