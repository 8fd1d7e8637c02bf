//! Registry mapping node type ids to executors.
//!
//! The registry is built once at startup, then shared read-only behind an
//! `Arc`. It needs no locking because nothing registers after that point.

use crate::context::ExecutionContext;
use crate::definition::{NodeCategory, NodeDefinition};
use crate::error::RegistryError;
use crate::executor::NodeExecutor;
use crate::node::{JsonMap, Node};
use crate::result::ExecutionResult;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Outcome of validating a node configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

struct Registration {
    definition: NodeDefinition,
    executor: Arc<dyn NodeExecutor>,
}

/// Lookup table from type id to executor.
#[derive(Default)]
pub struct NodeRegistry {
    entries: HashMap<String, Registration>,
}

impl NodeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an executor under the id of its definition, replacing any
    /// executor previously registered for that id.
    pub fn register<E>(&mut self, executor: E)
    where
        E: NodeExecutor + 'static,
    {
        self.register_arc(Arc::new(executor));
    }

    /// Registers an already shared executor.
    pub fn register_arc(&mut self, executor: Arc<dyn NodeExecutor>) {
        let definition = executor.definition();
        debug!(type_id = %definition.id, "registering node executor");
        self.entries.insert(
            definition.id.clone(),
            Registration {
                definition,
                executor,
            },
        );
    }

    /// Executor for a type id.
    #[must_use]
    pub fn executor(&self, type_id: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.entries.get(type_id).map(|entry| Arc::clone(&entry.executor))
    }

    /// Definition for a type id.
    #[must_use]
    pub fn definition(&self, type_id: &str) -> Option<&NodeDefinition> {
        self.entries.get(type_id).map(|entry| &entry.definition)
    }

    #[must_use]
    pub fn contains(&self, type_id: &str) -> bool {
        self.entries.contains_key(type_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered type ids, sorted.
    #[must_use]
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<_> = self.entries.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Every definition, sorted by type id.
    #[must_use]
    pub fn definitions(&self) -> Vec<&NodeDefinition> {
        let mut definitions: Vec<_> = self.entries.values().map(|e| &e.definition).collect();
        definitions.sort_by(|a, b| a.id.cmp(&b.id));
        definitions
    }

    /// Definitions of one category, sorted by type id.
    #[must_use]
    pub fn definitions_by_category(&self, category: NodeCategory) -> Vec<&NodeDefinition> {
        self.definitions()
            .into_iter()
            .filter(|d| d.category == category)
            .collect()
    }

    /// Checks that every required parameter is present and non-empty.
    ///
    /// Only presence is checked; value shapes are the executor's concern.
    #[must_use]
    pub fn validate_config(&self, type_id: &str, config: &JsonMap) -> ValidationReport {
        let Some(definition) = self.definition(type_id) else {
            return ValidationReport::from_errors(vec![format!("unknown node type '{type_id}'")]);
        };

        let errors = definition
            .required_parameters()
            .filter(|param| config.get(&param.name).is_none_or(is_empty))
            .map(|param| format!("missing required parameter '{}'", param.name))
            .collect();
        ValidationReport::from_errors(errors)
    }

    /// Dispatches a node to its executor and returns the result unmodified.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the type is not registered.
    pub async fn execute(
        &self,
        type_id: &str,
        node: &Node,
        context: &ExecutionContext,
    ) -> Result<ExecutionResult, RegistryError> {
        let executor = self.executor(type_id).ok_or_else(|| RegistryError::NotFound {
            type_id: type_id.to_string(),
        })?;
        Ok(executor.execute(node, context).await)
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("types", &self.types())
            .finish()
    }
}

fn is_empty(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::String(s) => s.trim().is_empty(),
        JsonValue::Array(items) => items.is_empty(),
        JsonValue::Object(map) => map.is_empty(),
        JsonValue::Bool(_) | JsonValue::Number(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ParameterDefinition, ParameterKind};
    use async_trait::async_trait;
    use flowloom_core::{WorkflowId, WorkflowRunId};
    use serde_json::json;

    struct Greeter;

    #[async_trait]
    impl NodeExecutor for Greeter {
        fn definition(&self) -> NodeDefinition {
            NodeDefinition::new("test.greet", "Greet", NodeCategory::Action)
                .with_parameter(ParameterDefinition::required("name", ParameterKind::String))
                .with_parameter(ParameterDefinition::optional("punctuation", ParameterKind::String))
        }

        async fn execute(&self, _node: &Node, context: &ExecutionContext) -> ExecutionResult {
            let name = context.input.get("name").and_then(JsonValue::as_str).unwrap_or("nobody");
            let mut output = JsonMap::new();
            output.insert("greeting".to_string(), json!(format!("hello {name}")));
            ExecutionResult::success(output).with_duration_ms(7)
        }
    }

    fn config(value: JsonValue) -> JsonMap {
        value.as_object().cloned().expect("object")
    }

    fn registry() -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        registry.register(Greeter);
        registry
    }

    #[test]
    fn lookup_by_type() {
        let registry = registry();
        assert!(registry.contains("test.greet"));
        assert!(registry.executor("test.greet").is_some());
        assert_eq!(registry.definition("test.greet").map(|d| d.name.as_str()), Some("Greet"));
        assert!(registry.executor("missing").is_none());
        assert_eq!(registry.types(), vec!["test.greet"]);
        assert_eq!(registry.definitions_by_category(NodeCategory::Action).len(), 1);
        assert!(registry.definitions_by_category(NodeCategory::Trigger).is_empty());
    }

    #[test]
    fn validate_accepts_present_required_parameters() {
        let report = registry().validate_config("test.greet", &config(json!({"name": "ada"})));
        assert!(report.valid);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn validate_rejects_missing_or_empty_required_parameters() {
        let registry = registry();
        for cfg in [json!({}), json!({"name": ""}), json!({"name": null}), json!({"name": []})] {
            let report = registry.validate_config("test.greet", &config(cfg));
            assert!(!report.valid);
            assert_eq!(report.errors, vec!["missing required parameter 'name'".to_string()]);
        }
    }

    #[test]
    fn validate_ignores_optional_and_unknown_keys() {
        let report = registry().validate_config(
            "test.greet",
            &config(json!({"name": "ada", "punctuation": "", "extra": 1})),
        );
        assert!(report.valid);
    }

    #[test]
    fn validate_unknown_type_is_invalid() {
        let report = registry().validate_config("nope", &JsonMap::new());
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
    }

    #[tokio::test]
    async fn execute_returns_executor_result_unmodified() {
        let registry = registry();
        let mut ctx = ExecutionContext::new(WorkflowRunId::new(), WorkflowId::new());
        ctx.input.insert("name".to_string(), json!("ada"));
        let node = Node::new("A", "test.greet");

        let result = registry.execute("test.greet", &node, &ctx).await.expect("registered");
        assert!(result.success);
        assert_eq!(result.duration_ms, 7);
        assert_eq!(result.output.and_then(|o| o.get("greeting").cloned()), Some(json!("hello ada")));
    }

    #[tokio::test]
    async fn execute_unknown_type_is_not_found() {
        let registry = registry();
        let ctx = ExecutionContext::new(WorkflowRunId::new(), WorkflowId::new());
        let err = registry
            .execute("nope", &Node::new("A", "nope"), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::NotFound { type_id: "nope".to_string() });
    }
}
