//! Outcome of a single node execution.

use crate::node::JsonMap;
use serde::{Deserialize, Serialize};

/// Result returned by an executor.
///
/// Exactly one of `output` and `error` is meaningful, chosen by `success`.
/// `duration` is in milliseconds and is stamped by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<JsonMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Output path chosen by a decision node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(rename = "duration", default)]
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// A successful result carrying `output`.
    #[must_use]
    pub fn success(output: JsonMap) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            branch: None,
            duration_ms: 0,
        }
    }

    /// A failed result carrying `error`.
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            branch: None,
            duration_ms: 0,
        }
    }

    /// Selects the output path that conditional edges are matched against.
    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Error message, or a placeholder for failures that carry none.
    #[must_use]
    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("node failed without an error message")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failure_serializes_without_output() {
        let json = serde_json::to_value(ExecutionResult::failure("timeout").with_duration_ms(12))
            .expect("serialize");
        assert_eq!(json, json!({"success": false, "error": "timeout", "duration": 12}));
    }

    #[test]
    fn branch_is_carried() {
        let result = ExecutionResult::success(JsonMap::new()).with_branch("true");
        assert_eq!(result.branch.as_deref(), Some("true"));
        assert_eq!(result.error_message(), "node failed without an error message");
    }
}
