//! Node type catalog.

use crate::error::ApiError;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use flowloom_workflow::{JsonMap, NodeCategory, NodeDefinition, ValidationReport};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub category: Option<NodeCategory>,
}

/// Registered node definitions, sorted by type id.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<NodeDefinition>> {
    let registry = state.engine.registry();
    let definitions = match query.category {
        Some(category) => registry.definitions_by_category(category),
        None => registry.definitions(),
    };
    Json(definitions.into_iter().cloned().collect())
}

/// Checks a node configuration against its type's required parameters.
pub async fn validate(
    State(state): State<AppState>,
    Path(type_id): Path<String>,
    Json(config): Json<JsonMap>,
) -> Result<Json<ValidationReport>, ApiError> {
    let registry = state.engine.registry();
    if !registry.contains(&type_id) {
        return Err(ApiError::not_found("node type", type_id));
    }
    Ok(Json(registry.validate_config(&type_id, &config)))
}
