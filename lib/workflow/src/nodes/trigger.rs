use crate::context::ExecutionContext;
use crate::definition::{NodeCategory, NodeDefinition};
use crate::executor::NodeExecutor;
use crate::node::Node;
use crate::result::ExecutionResult;
use async_trait::async_trait;

/// Entry point for runs started by hand, by a schedule or by a queued job.
///
/// Passes the run's initial input through unchanged.
pub struct ManualTriggerExecutor;

pub const MANUAL_TRIGGER: &str = "trigger.manual";

#[async_trait]
impl NodeExecutor for ManualTriggerExecutor {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new(MANUAL_TRIGGER, "Manual Trigger", NodeCategory::Trigger)
            .with_description("Starts a run with the submitted input")
            .with_inputs(Vec::<String>::new())
    }

    async fn execute(&self, _node: &Node, context: &ExecutionContext) -> ExecutionResult {
        ExecutionResult::success(context.input.clone())
    }
}
