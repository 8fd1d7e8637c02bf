//! Static descriptions of node types.
//!
//! Every executor publishes a [`NodeDefinition`] so that clients can list the
//! available node types and the registry can validate node configuration
//! before a run starts.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Broad role of a node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    /// Starts a run.
    Trigger,
    /// Talks to an external system.
    Action,
    /// Chooses which outgoing branch to follow.
    Condition,
    /// Reshapes data without side effects.
    Transform,
}

/// Expected JSON shape of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    Any,
    String,
    Number,
    Boolean,
    Object,
    Array,
    /// A condition expression, see [`crate::condition::Condition`].
    Condition,
}

/// A configuration parameter accepted by a node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDefinition {
    pub name: String,
    pub kind: ParameterKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<JsonValue>,
}

impl ParameterDefinition {
    /// A required parameter.
    #[must_use]
    pub fn required(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            description: None,
            default: None,
        }
    }

    /// An optional parameter.
    #[must_use]
    pub fn optional(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind)
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_default(mut self, default: JsonValue) -> Self {
        self.default = Some(default);
        self
    }
}

/// A named input or output of a node type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PortDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }
}

/// Description of a node type published by its executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDefinition {
    /// Type id nodes use to reference this executor.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: NodeCategory,
    #[serde(default)]
    pub parameters: Vec<ParameterDefinition>,
    #[serde(default)]
    pub inputs: Vec<PortDefinition>,
    /// Outputs; for condition nodes these are the branch names.
    #[serde(default)]
    pub outputs: Vec<PortDefinition>,
}

impl NodeDefinition {
    /// Creates a definition with a single `main` input and output.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, category: NodeCategory) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            category,
            parameters: Vec::new(),
            inputs: vec![PortDefinition::new("main")],
            outputs: vec![PortDefinition::new("main")],
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_parameter(mut self, parameter: ParameterDefinition) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Replaces the inputs.
    #[must_use]
    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(PortDefinition::new).collect();
        self
    }

    /// Replaces the outputs.
    #[must_use]
    pub fn with_outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = outputs.into_iter().map(PortDefinition::new).collect();
        self
    }

    /// Parameters that must be present and non-empty.
    pub fn required_parameters(&self) -> impl Iterator<Item = &ParameterDefinition> {
        self.parameters.iter().filter(|p| p.required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_parameters() {
        let def = NodeDefinition::new("logic.if", "If", NodeCategory::Condition)
            .with_parameter(ParameterDefinition::required("condition", ParameterKind::Condition))
            .with_parameter(ParameterDefinition::optional("label", ParameterKind::String))
            .with_outputs(["true", "false"]);

        let required: Vec<_> = def.required_parameters().map(|p| p.name.as_str()).collect();
        assert_eq!(required, vec!["condition"]);
        assert_eq!(def.outputs.len(), 2);
        assert_eq!(def.inputs[0].name, "main");
    }

    #[test]
    fn category_serializes_snake_case() {
        let json = serde_json::to_value(NodeCategory::Trigger).expect("serialize");
        assert_eq!(json, "trigger");
    }
}
