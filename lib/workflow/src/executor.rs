//! The contract every node type implements.

use crate::context::ExecutionContext;
use crate::definition::NodeDefinition;
use crate::node::Node;
use crate::result::ExecutionResult;
use async_trait::async_trait;

/// Executes one node type.
///
/// Failures are reported through [`ExecutionResult::failure`], never by
/// panicking. Executors must not hold on to the context past the call and
/// are expected to enforce their own timeouts for external I/O.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Static description of this node type.
    fn definition(&self) -> NodeDefinition;

    /// Runs the node against the current context.
    ///
    /// `context.input` already contains the node's configuration overlaid on
    /// upstream data.
    async fn execute(&self, node: &Node, context: &ExecutionContext) -> ExecutionResult;
}
