//! Typed condition expressions.
//!
//! Conditions are plain data: a tree of comparisons joined by `all`, `any`
//! and `not`. They are evaluated against a JSON document (a node's scope, or
//! a database row for change filters); nothing is ever compiled or executed
//! as code.
//!
//! ```json
//! {"all": [
//!     {"left": "user.age", "operator": "greaterThanOrEqual", "right": 18},
//!     {"not": {"left": "user.email", "operator": "isEmpty"}}
//! ]}
//! ```

use crate::error::ConditionError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    /// Right operand is a regular expression.
    Matches,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    IsEmpty,
    IsNotEmpty,
    Exists,
}

impl Operator {
    fn is_unary(self) -> bool {
        matches!(self, Self::IsEmpty | Self::IsNotEmpty | Self::Exists)
    }

    fn name(self) -> String {
        serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default()
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    /// Another value from the same document.
    Path { path: String },
    Value(JsonValue),
}

/// A single comparison of a document path against an operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    /// Dotted path into the document, e.g. `items.0.price`.
    pub left: String,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<Operand>,
}

/// A boolean expression over a JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    All { all: Vec<Condition> },
    Any { any: Vec<Condition> },
    Not { not: Box<Condition> },
    Compare(Comparison),
}

impl Condition {
    /// Shorthand for a comparison against a literal.
    #[must_use]
    pub fn compare(left: impl Into<String>, operator: Operator, right: JsonValue) -> Self {
        Self::Compare(Comparison {
            left: left.into(),
            operator,
            right: Some(Operand::Value(right)),
        })
    }

    /// Shorthand for a unary check such as `exists`.
    #[must_use]
    pub fn check(left: impl Into<String>, operator: Operator) -> Self {
        Self::Compare(Comparison {
            left: left.into(),
            operator,
            right: None,
        })
    }

    /// Evaluates the expression against `document`.
    ///
    /// `all` of nothing is true and `any` of nothing is false.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid regular expressions or a missing right
    /// operand on a binary operator.
    pub fn evaluate(&self, document: &JsonValue) -> Result<bool, ConditionError> {
        match self {
            Self::All { all } => {
                for condition in all {
                    if !condition.evaluate(document)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Any { any } => {
                for condition in any {
                    if condition.evaluate(document)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Not { not } => Ok(!not.evaluate(document)?),
            Self::Compare(comparison) => comparison.evaluate(document),
        }
    }
}

impl Comparison {
    fn evaluate(&self, document: &JsonValue) -> Result<bool, ConditionError> {
        let left = resolve_path(document, &self.left);

        if self.operator.is_unary() {
            return Ok(match self.operator {
                Operator::Exists => left.is_some(),
                Operator::IsEmpty => left.is_none_or(is_empty),
                _ => !left.is_none_or(is_empty),
            });
        }

        let right = match &self.right {
            Some(Operand::Path { path }) => resolve_path(document, path),
            Some(Operand::Value(value)) => Some(value),
            None => {
                return Err(ConditionError::MissingOperand {
                    operator: self.operator.name(),
                });
            }
        };

        let (Some(left), Some(right)) = (left, right) else {
            // missing values only ever satisfy the negated operators
            return Ok(matches!(
                self.operator,
                Operator::NotEquals | Operator::NotContains
            ));
        };

        Ok(match self.operator {
            Operator::Equals => loosely_equal(left, right),
            Operator::NotEquals => !loosely_equal(left, right),
            Operator::Contains => contains(left, right),
            Operator::NotContains => !contains(left, right),
            Operator::StartsWith => display(left).starts_with(&display(right)),
            Operator::EndsWith => display(left).ends_with(&display(right)),
            Operator::Matches => {
                let pattern = display(right);
                let regex = Regex::new(&pattern).map_err(|e| ConditionError::InvalidRegex {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })?;
                regex.is_match(&display(left))
            }
            Operator::GreaterThan => compare_numbers(left, right, |a, b| a > b),
            Operator::GreaterThanOrEqual => compare_numbers(left, right, |a, b| a >= b),
            Operator::LessThan => compare_numbers(left, right, |a, b| a < b),
            Operator::LessThanOrEqual => compare_numbers(left, right, |a, b| a <= b),
            Operator::IsEmpty | Operator::IsNotEmpty | Operator::Exists => false,
        })
    }
}

/// Resolves a dotted path. Numeric segments index into arrays.
#[must_use]
pub fn resolve_path<'a>(document: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    if path.is_empty() {
        return Some(document);
    }
    path.split('.').try_fold(document, |current, segment| match current {
        JsonValue::Object(map) => map.get(segment),
        JsonValue::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn is_empty(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::String(s) => s.is_empty(),
        JsonValue::Array(items) => items.is_empty(),
        JsonValue::Object(map) => map.is_empty(),
        JsonValue::Bool(_) | JsonValue::Number(_) => false,
    }
}

fn display(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

fn as_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn loosely_equal(left: &JsonValue, right: &JsonValue) -> bool {
    if left == right {
        return true;
    }
    if let (Some(a), Some(b)) = (as_number(left), as_number(right)) {
        return a == b;
    }
    match (left, right) {
        (JsonValue::String(_), _) | (_, JsonValue::String(_)) => display(left) == display(right),
        _ => false,
    }
}

fn contains(haystack: &JsonValue, needle: &JsonValue) -> bool {
    match haystack {
        JsonValue::String(s) => s.contains(&display(needle)),
        JsonValue::Array(items) => items.iter().any(|item| loosely_equal(item, needle)),
        JsonValue::Object(map) => map.contains_key(&display(needle)),
        _ => false,
    }
}

fn compare_numbers(left: &JsonValue, right: &JsonValue, op: impl Fn(f64, f64) -> bool) -> bool {
    match (as_number(left), as_number(right)) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> JsonValue {
        json!({
            "user": {"name": "Ada Lovelace", "age": 36, "email": "", "tags": ["admin", "ops"]},
            "count": "12",
            "items": [{"price": 3.5}, {"price": 10}],
            "$node": {"A": {"x": 2}}
        })
    }

    fn eval(condition: JsonValue) -> bool {
        serde_json::from_value::<Condition>(condition)
            .expect("parse condition")
            .evaluate(&doc())
            .expect("evaluate")
    }

    #[test]
    fn resolves_nested_paths() {
        let doc = doc();
        assert_eq!(resolve_path(&doc, "items.1.price"), Some(&json!(10)));
        assert_eq!(resolve_path(&doc, "$node.A.x"), Some(&json!(2)));
        assert_eq!(resolve_path(&doc, "user.missing"), None);
        assert_eq!(resolve_path(&doc, "items.x"), None);
    }

    #[test]
    fn equality_coerces_numbers_and_strings() {
        assert!(eval(json!({"left": "count", "operator": "equals", "right": 12})));
        assert!(eval(json!({"left": "user.age", "operator": "equals", "right": "36"})));
        assert!(eval(json!({"left": "user.age", "operator": "notEquals", "right": 37})));
    }

    #[test]
    fn numeric_comparisons() {
        assert!(eval(json!({"left": "user.age", "operator": "greaterThanOrEqual", "right": 18})));
        assert!(eval(json!({"left": "items.0.price", "operator": "lessThan", "right": 4})));
        assert!(!eval(json!({"left": "user.name", "operator": "greaterThan", "right": 1})));
    }

    #[test]
    fn string_and_collection_operators() {
        assert!(eval(json!({"left": "user.name", "operator": "startsWith", "right": "Ada"})));
        assert!(eval(json!({"left": "user.name", "operator": "endsWith", "right": "lace"})));
        assert!(eval(json!({"left": "user.tags", "operator": "contains", "right": "ops"})));
        assert!(eval(json!({"left": "user", "operator": "contains", "right": "email"})));
        assert!(eval(json!({"left": "user.name", "operator": "notContains", "right": "Byron"})));
        assert!(eval(json!({"left": "user.name", "operator": "matches", "right": "^Ada\\s+L"})));
    }

    #[test]
    fn unary_operators() {
        assert!(eval(json!({"left": "user.email", "operator": "isEmpty"})));
        assert!(eval(json!({"left": "user.nickname", "operator": "isEmpty"})));
        assert!(eval(json!({"left": "user.tags", "operator": "isNotEmpty"})));
        assert!(eval(json!({"left": "user.email", "operator": "exists"})));
        assert!(!eval(json!({"left": "user.nickname", "operator": "exists"})));
    }

    #[test]
    fn missing_left_only_satisfies_negations() {
        assert!(!eval(json!({"left": "nope", "operator": "equals", "right": 1})));
        assert!(eval(json!({"left": "nope", "operator": "notEquals", "right": 1})));
    }

    #[test]
    fn path_operands_compare_two_fields() {
        assert!(eval(json!({"left": "$node.A.x", "operator": "lessThan", "right": {"path": "user.age"}})));
    }

    #[test]
    fn logical_combinators() {
        assert!(eval(json!({"all": [
            {"left": "user.age", "operator": "greaterThan", "right": 30},
            {"any": [
                {"left": "user.tags", "operator": "contains", "right": "nobody"},
                {"not": {"left": "user.email", "operator": "isNotEmpty"}}
            ]}
        ]})));
        assert!(eval(json!({"all": []})));
        assert!(!eval(json!({"any": []})));
    }

    #[test]
    fn invalid_regex_is_an_error() {
        let condition = Condition::compare("user.name", Operator::Matches, json!("("));
        assert!(matches!(
            condition.evaluate(&doc()),
            Err(ConditionError::InvalidRegex { .. })
        ));
    }

    #[test]
    fn binary_operator_without_operand_is_an_error() {
        let condition = Condition::check("user.age", Operator::GreaterThan);
        assert_eq!(
            condition.evaluate(&doc()),
            Err(ConditionError::MissingOperand {
                operator: "greaterThan".to_string()
            })
        );
    }
}
