use crate::context::ExecutionContext;
use crate::definition::{NodeCategory, NodeDefinition, ParameterDefinition, ParameterKind};
use crate::executor::NodeExecutor;
use crate::node::Node;
use crate::result::ExecutionResult;
use async_trait::async_trait;
use serde_json::Value as JsonValue;

/// Emits a fixed object from its `values` parameter.
pub struct SetExecutor;

#[async_trait]
impl NodeExecutor for SetExecutor {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("data.set", "Set", NodeCategory::Transform)
            .with_description("Outputs the configured values")
            .with_parameter(
                ParameterDefinition::required("values", ParameterKind::Object)
                    .with_description("Fields to output"),
            )
    }

    async fn execute(&self, _node: &Node, context: &ExecutionContext) -> ExecutionResult {
        match context.input.get("values") {
            Some(JsonValue::Object(values)) => ExecutionResult::success(values.clone()),
            Some(_) => ExecutionResult::failure("'values' must be an object"),
            None => ExecutionResult::failure("missing 'values'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowloom_core::{WorkflowId, WorkflowRunId};
    use serde_json::json;

    #[tokio::test]
    async fn outputs_values() {
        let mut ctx = ExecutionContext::new(WorkflowRunId::new(), WorkflowId::new());
        ctx.input.insert("values".to_string(), json!({"x": 1}));
        let result = SetExecutor.execute(&Node::new("A", "data.set"), &ctx).await;
        assert_eq!(result.output.map(JsonValue::Object), Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn rejects_non_object_values() {
        let mut ctx = ExecutionContext::new(WorkflowRunId::new(), WorkflowId::new());
        ctx.input.insert("values".to_string(), json!([1, 2]));
        let result = SetExecutor.execute(&Node::new("A", "data.set"), &ctx).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("'values' must be an object"));
    }
}
