//! Run submission, lookup and cancellation.

use super::parse_id;
use crate::error::ApiError;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use flowloom_core::{WorkflowId, WorkflowRunId};
use flowloom_workflow::{Edge, JsonMap, LiveRun, Node, RunOptions, RunRecord, RunResult, WorkflowGraph};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

/// Body of `POST /api/runs`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRun {
    #[serde(default)]
    pub workflow_id: Option<WorkflowId>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub initial_input: JsonMap,
    #[serde(default)]
    pub run_options: RunOptions,
}

/// Executes a submitted graph and returns once the run is terminal.
///
/// Structural errors (duplicate node ids, dangling edges) are rejected
/// with 400. Everything else, cycles included, is reported as a failed run.
pub async fn submit(
    State(state): State<AppState>,
    Json(request): Json<SubmitRun>,
) -> Result<Json<RunResult>, ApiError> {
    let graph = WorkflowGraph::from_parts(request.nodes, request.edges)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let mut options = request.run_options;
    if request.workflow_id.is_some() {
        options.workflow_id = request.workflow_id;
    }

    let result = state
        .engine
        .execute_workflow(&graph, request.initial_input, options)
        .await;
    Ok(Json(result))
}

/// Returns the stored record of a run.
pub async fn get(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunRecord>, ApiError> {
    let run_id: WorkflowRunId = parse_id("run", &run_id)?;
    let record = state
        .engine
        .runs()
        .get(run_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found("run", run_id))?;
    Ok(Json(record))
}

/// Requests cooperative cancellation of a running run.
pub async fn cancel(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<JsonValue>, ApiError> {
    let run_id: WorkflowRunId = parse_id("run", &run_id)?;
    let cancelled = state.engine.cancel_execution(run_id).await;
    Ok(Json(json!({ "runId": run_id, "cancelled": cancelled })))
}

/// Runs currently executing on this server.
pub async fn active(State(state): State<AppState>) -> Json<Vec<LiveRun>> {
    Json(state.engine.monitor().active_runs().await)
}

#[cfg(test)]
mod tests {
    use super::super::testing::{TestApp, greeting_graph};
    use axum::http::{Method, StatusCode};
    use serde_json::{Value as JsonValue, json};

    #[tokio::test]
    async fn submit_runs_graph_to_completion() {
        let app = TestApp::new();
        let mut body = greeting_graph();
        body["initialInput"] = json!({"name": "ada"});

        let (status, result) = app.call(Method::POST, "/api/runs", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(result["status"], json!("completed"));
        assert_eq!(result["executionOrder"], json!(["start", "set"]));
        assert_eq!(result["output"]["greeting"], json!("hi"));

        let run_id = result["runId"].as_str().expect("run id");
        let (status, record) = app
            .call(Method::GET, &format!("/api/runs/{run_id}"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(record["status"], json!("completed"));
    }

    #[tokio::test]
    async fn resubmitting_a_run_id_overwrites_the_record() {
        let app = TestApp::new();
        let mut body = greeting_graph();
        let (_, first) = app.call(Method::POST, "/api/runs", Some(body.clone())).await;
        let run_id = first["runId"].clone();

        body["runOptions"] = json!({"runId": run_id});
        let (_, second) = app.call(Method::POST, "/api/runs", Some(body)).await;
        assert_eq!(second["runId"], run_id);
        assert_eq!(second["status"], json!("completed"));
    }

    #[tokio::test]
    async fn unknown_node_type_fails_the_run() {
        let app = TestApp::new();
        let body = json!({"nodes": [{"id": "a", "typeId": "no.such.type"}], "edges": []});
        let (status, result) = app.call(Method::POST, "/api/runs", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(result["status"], json!("failed"));
        assert_eq!(result["nodeResults"], json!({}));
    }

    #[tokio::test]
    async fn dangling_edge_is_rejected() {
        let app = TestApp::new();
        let body = json!({
            "nodes": [{"id": "a", "typeId": "trigger.manual"}],
            "edges": [{"sourceId": "a", "targetId": "ghost"}]
        });
        let (status, error) = app.call(Method::POST, "/api/runs", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(error["error"].as_str().is_some());
    }

    #[tokio::test]
    async fn missing_and_malformed_run_ids() {
        let app = TestApp::new();
        let (status, _) = app.call(Method::GET, "/api/runs/not-an-id", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let run_id = flowloom_core::WorkflowRunId::new();
        let (status, _) = app
            .call(Method::GET, &format!("/api/runs/{run_id}"), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cancelling_an_idle_run_reports_false() {
        let app = TestApp::new();
        let run_id = flowloom_core::WorkflowRunId::new();
        let (status, body) = app
            .call(Method::POST, &format!("/api/runs/{run_id}/cancel"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cancelled"], JsonValue::Bool(false));
    }
}
