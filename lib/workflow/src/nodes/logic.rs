//! Branching nodes.
//!
//! Both executors pick a branch name; outgoing edges whose `condition`
//! matches that name are followed and every other conditional edge is pruned.

use crate::condition::Condition;
use crate::context::ExecutionContext;
use crate::definition::{NodeCategory, NodeDefinition, ParameterDefinition, ParameterKind};
use crate::executor::NodeExecutor;
use crate::node::{JsonMap, Node};
use crate::result::ExecutionResult;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

/// Follows the `true` or `false` branch.
pub struct IfExecutor;

#[async_trait]
impl NodeExecutor for IfExecutor {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("logic.if", "If", NodeCategory::Condition)
            .with_description("Routes to the true or false branch")
            .with_parameter(ParameterDefinition::required("condition", ParameterKind::Condition))
            .with_outputs(["true", "false"])
    }

    async fn execute(&self, _node: &Node, context: &ExecutionContext) -> ExecutionResult {
        let condition = match parse::<Condition>(context, "condition") {
            Ok(condition) => condition,
            Err(error) => return ExecutionResult::failure(error),
        };
        match condition.evaluate(&context.scope()) {
            Ok(matched) => {
                ExecutionResult::success(object(json!({ "matched": matched })))
                    .with_branch(matched.to_string())
            }
            Err(err) => ExecutionResult::failure(err.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SwitchRule {
    output: String,
    condition: Condition,
}

const DEFAULT_FALLBACK: &str = "default";

/// Follows the output of the first matching rule, or the fallback.
pub struct SwitchExecutor;

#[async_trait]
impl NodeExecutor for SwitchExecutor {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("logic.switch", "Switch", NodeCategory::Condition)
            .with_description("Routes to the output of the first matching rule")
            .with_parameter(
                ParameterDefinition::required("rules", ParameterKind::Array)
                    .with_description("Ordered list of {output, condition}"),
            )
            .with_parameter(
                ParameterDefinition::optional("fallback", ParameterKind::String)
                    .with_default(json!(DEFAULT_FALLBACK)),
            )
            .with_outputs(Vec::<String>::new())
    }

    async fn execute(&self, _node: &Node, context: &ExecutionContext) -> ExecutionResult {
        let rules = match parse::<Vec<SwitchRule>>(context, "rules") {
            Ok(rules) => rules,
            Err(error) => return ExecutionResult::failure(error),
        };
        let fallback = context
            .input
            .get("fallback")
            .and_then(JsonValue::as_str)
            .unwrap_or(DEFAULT_FALLBACK);

        let scope = context.scope();
        for rule in &rules {
            match rule.condition.evaluate(&scope) {
                Ok(true) => {
                    return ExecutionResult::success(object(json!({ "branch": rule.output })))
                        .with_branch(rule.output.clone());
                }
                Ok(false) => {}
                Err(err) => return ExecutionResult::failure(err.to_string()),
            }
        }
        ExecutionResult::success(object(json!({ "branch": fallback }))).with_branch(fallback)
    }
}

fn parse<T: for<'de> Deserialize<'de>>(context: &ExecutionContext, key: &str) -> Result<T, String> {
    let value = context
        .input
        .get(key)
        .cloned()
        .ok_or_else(|| format!("missing '{key}'"))?;
    serde_json::from_value(value).map_err(|e| format!("invalid '{key}': {e}"))
}

fn object(value: JsonValue) -> JsonMap {
    match value {
        JsonValue::Object(map) => map,
        _ => JsonMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowloom_core::{WorkflowId, WorkflowRunId};

    fn context(input: JsonValue) -> ExecutionContext {
        let mut ctx = ExecutionContext::new(WorkflowRunId::new(), WorkflowId::new());
        ctx.input = object(input);
        ctx
    }

    #[tokio::test]
    async fn if_selects_true_branch() {
        let ctx = context(json!({
            "x": 5,
            "condition": {"left": "x", "operator": "greaterThan", "right": 3}
        }));
        let result = IfExecutor.execute(&Node::new("check", "logic.if"), &ctx).await;
        assert!(result.success);
        assert_eq!(result.branch.as_deref(), Some("true"));
        assert_eq!(result.output.and_then(|o| o.get("matched").cloned()), Some(json!(true)));
    }

    #[tokio::test]
    async fn if_selects_false_branch() {
        let ctx = context(json!({
            "x": 1,
            "condition": {"left": "x", "operator": "greaterThan", "right": 3}
        }));
        let result = IfExecutor.execute(&Node::new("check", "logic.if"), &ctx).await;
        assert_eq!(result.branch.as_deref(), Some("false"));
    }

    #[tokio::test]
    async fn if_reports_unparseable_condition() {
        let ctx = context(json!({"condition": 42}));
        let result = IfExecutor.execute(&Node::new("check", "logic.if"), &ctx).await;
        assert!(!result.success);
        assert!(result.error_message().starts_with("invalid 'condition'"));
    }

    #[tokio::test]
    async fn switch_picks_first_matching_rule() {
        let ctx = context(json!({
            "status": "shipped",
            "rules": [
                {"output": "pending", "condition": {"left": "status", "operator": "equals", "right": "pending"}},
                {"output": "done", "condition": {"left": "status", "operator": "equals", "right": "shipped"}},
                {"output": "late", "condition": {"left": "status", "operator": "isNotEmpty"}}
            ]
        }));
        let result = SwitchExecutor.execute(&Node::new("route", "logic.switch"), &ctx).await;
        assert_eq!(result.branch.as_deref(), Some("done"));
        let output = result.output.expect("output");
        assert_eq!(output.get("branch"), Some(&json!("done")));
        assert!(!output.contains_key("output"));
    }

    #[tokio::test]
    async fn switch_uses_fallback() {
        let ctx = context(json!({
            "status": "lost",
            "fallback": "other",
            "rules": [
                {"output": "done", "condition": {"left": "status", "operator": "equals", "right": "shipped"}}
            ]
        }));
        let result = SwitchExecutor.execute(&Node::new("route", "logic.switch"), &ctx).await;
        assert_eq!(result.branch.as_deref(), Some("other"));
    }
}
