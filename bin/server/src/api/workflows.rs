//! Registered workflows: graphs that queued, scheduled and change-driven
//! runs execute.

use super::parse_id;
use crate::error::ApiError;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use flowloom_core::WorkflowId;
use flowloom_queue::{JobOptions, JobPriority};
use flowloom_workflow::{GraphSpec, JsonMap, RunRecord, WorkflowGraph};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::time::Duration;
use tracing::info;

const DEFAULT_RUN_LIMIT: usize = 20;
const MAX_RUN_LIMIT: usize = 200;

/// Stores or replaces a workflow's graph.
///
/// The graph must be acyclic and every node must pass configuration
/// validation, so triggered runs do not fail on problems detectable now.
pub async fn register(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Json(spec): Json<GraphSpec>,
) -> Result<Json<JsonValue>, ApiError> {
    let workflow_id: WorkflowId = parse_id("workflow", &workflow_id)?;
    let graph = WorkflowGraph::try_from(spec).map_err(|e| ApiError::bad_request(e.to_string()))?;
    graph
        .validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let registry = state.engine.registry();
    let errors: Vec<String> = graph
        .nodes()
        .flat_map(|node| {
            registry
                .validate_config(&node.type_id, &node.config)
                .errors
                .into_iter()
                .map(move |error| format!("node '{}': {error}", node.id))
        })
        .collect();
    if !errors.is_empty() {
        return Err(ApiError::bad_request(errors.join("; ")));
    }

    let nodes = graph.node_count();
    state.workflows.put(workflow_id, graph).await;
    info!(workflow_id = %workflow_id, nodes, "workflow registered");
    Ok(Json(json!({ "workflowId": workflow_id, "nodes": nodes })))
}

/// Forgets a workflow. Its schedule, if any, is stopped too.
pub async fn remove(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let workflow_id: WorkflowId = parse_id("workflow", &workflow_id)?;
    if !state.workflows.remove(workflow_id).await {
        return Err(ApiError::not_found("workflow", workflow_id));
    }
    state.scheduler.unschedule_workflow(workflow_id).await;
    info!(workflow_id = %workflow_id, "workflow removed");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Most recent runs of a workflow, newest first.
pub async fn runs(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Vec<RunRecord>>, ApiError> {
    let workflow_id: WorkflowId = parse_id("workflow", &workflow_id)?;
    let limit = query.limit.unwrap_or(DEFAULT_RUN_LIMIT).min(MAX_RUN_LIMIT);
    let runs = state
        .engine
        .runs()
        .list_by_workflow(workflow_id, limit)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(runs))
}

/// Body of `POST /api/workflows/{workflowId}/jobs`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueJob {
    #[serde(default)]
    pub payload: JsonMap,
    #[serde(default)]
    pub priority: JobPriority,
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

/// Enqueues a run of a registered workflow.
pub async fn enqueue(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Json(request): Json<EnqueueJob>,
) -> Result<(StatusCode, Json<JsonValue>), ApiError> {
    let workflow_id: WorkflowId = parse_id("workflow", &workflow_id)?;
    if !state.workflows.contains(workflow_id).await {
        return Err(ApiError::not_found("workflow", workflow_id));
    }

    let mut options = JobOptions::default().with_priority(request.priority);
    if let Some(delay_ms) = request.delay_ms {
        options = options.with_delay(Duration::from_millis(delay_ms));
    }
    let job = state
        .run_queue
        .add_job(workflow_id, request.payload, options)
        .await
        .map_err(ApiError::internal)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "jobId": job.id,
            "runId": job.run_id,
            "priority": job.priority,
            "availableAt": job.available_at,
        })),
    ))
}

#[cfg(test)]
mod tests {
    use super::super::testing::{TestApp, greeting_graph};
    use axum::http::{Method, StatusCode};
    use flowloom_core::WorkflowId;
    use flowloom_queue::JobPriority;
    use serde_json::json;

    #[tokio::test]
    async fn register_then_enqueue_creates_pending_run() {
        let app = TestApp::new();
        let workflow_id = WorkflowId::new();
        let (status, _) = app
            .call(
                Method::PUT,
                &format!("/api/workflows/{workflow_id}"),
                Some(greeting_graph()),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, job) = app
            .call(
                Method::POST,
                &format!("/api/workflows/{workflow_id}/jobs"),
                Some(json!({"payload": {"n": 1}, "priority": "high", "delayMs": 60000})),
            )
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(job["priority"], json!("high"));
        assert_eq!(app.queue.pending().await, 1);

        let run_id = job["runId"].as_str().expect("run id");
        let (_, record) = app
            .call(Method::GET, &format!("/api/runs/{run_id}"), None)
            .await;
        assert_eq!(record["status"], json!("pending"));
        assert_eq!(record["input"], json!({"n": 1}));

        let (_, runs) = app
            .call(Method::GET, &format!("/api/workflows/{workflow_id}/runs"), None)
            .await;
        assert_eq!(runs.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn enqueue_unknown_workflow_is_not_found() {
        let app = TestApp::new();
        let (status, _) = app
            .call(
                Method::POST,
                &format!("/api/workflows/{}/jobs", WorkflowId::new()),
                Some(json!({})),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(app.queue.pending().await, 0);
    }

    #[tokio::test]
    async fn register_rejects_invalid_graphs() {
        let app = TestApp::new();
        let uri = format!("/api/workflows/{}", WorkflowId::new());

        let cyclic = json!({
            "nodes": [
                {"id": "a", "typeId": "trigger.manual"},
                {"id": "b", "typeId": "trigger.manual"}
            ],
            "edges": [{"sourceId": "a", "targetId": "b"}, {"sourceId": "b", "targetId": "a"}]
        });
        let (status, _) = app.call(Method::PUT, &uri, Some(cyclic)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let missing_param = json!({"nodes": [{"id": "s", "typeId": "data.set"}], "edges": []});
        let (status, body) = app.call(Method::PUT, &uri, Some(missing_param)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().is_some_and(|e| e.contains("values")));
    }

    #[tokio::test]
    async fn remove_stops_schedule() {
        let app = TestApp::new();
        let workflow_id = WorkflowId::new();
        let uri = format!("/api/workflows/{workflow_id}");
        app.call(Method::PUT, &uri, Some(greeting_graph())).await;
        app.state
            .scheduler
            .schedule_workflow(workflow_id, "0 0 * * *", None)
            .await
            .expect("schedule");

        let (status, _) = app.call(Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(!app.state.scheduler.is_scheduled(workflow_id).await);

        let (status, _) = app.call(Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn enqueue_defaults_to_normal_priority() {
        let request: super::EnqueueJob = serde_json::from_value(json!({})).expect("parse");
        assert_eq!(request.priority, JobPriority::default());
        assert!(request.delay_ms.is_none());
    }
}
