//! Change-driven triggers. Available only with a database configured.

use super::parse_id;
use crate::error::ApiError;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use flowloom_core::{WatchId, WorkflowId};
use flowloom_scheduler::{ChangeWatcher, WatchConfig, WatchInfo};
use flowloom_workflow::JsonMap;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;

/// Body of `POST /api/watches`: a workflow id plus the watch config fields.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWatch {
    pub workflow_id: WorkflowId,
    #[serde(flatten)]
    pub config: WatchConfig,
}

fn watcher(state: &AppState) -> Result<&Arc<ChangeWatcher>, ApiError> {
    state.watcher.as_ref().ok_or(ApiError::Unavailable {
        feature: "change watches",
        requires: "DATABASE_URL",
    })
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<WatchInfo>>, ApiError> {
    Ok(Json(watcher(&state)?.list().await))
}

/// Starts a watch for a registered workflow.
///
/// `pollIntervalMs` falls back to the server's configured default.
pub async fn create(
    State(state): State<AppState>,
    Json(mut body): Json<JsonMap>,
) -> Result<(StatusCode, Json<JsonValue>), ApiError> {
    let watcher = watcher(&state)?;
    body.entry("pollIntervalMs")
        .or_insert_with(|| json!(state.default_watch_poll_interval_ms));
    let request: CreateWatch = serde_json::from_value(JsonValue::Object(body))
        .map_err(|e| ApiError::bad_request(format!("invalid watch: {e}")))?;

    if !state.workflows.contains(request.workflow_id).await {
        return Err(ApiError::not_found("workflow", request.workflow_id));
    }

    let watch_id = watcher
        .watch(request.workflow_id, request.config)
        .await
        .map_err(|report| ApiError::bad_request(report.to_string()))?;
    Ok((StatusCode::CREATED, Json(json!({ "watchId": watch_id }))))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(watch_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let watcher = watcher(&state)?;
    let watch_id: WatchId = parse_id("watch", &watch_id)?;
    if watcher.unwatch(watch_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("watch", watch_id))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{TestApp, greeting_graph};
    use async_trait::async_trait;
    use axum::http::{Method, StatusCode};
    use chrono::{DateTime, Utc};
    use flowloom_core::WorkflowId;
    use flowloom_scheduler::{ChangeEvent, ChangeSource, ChangeWatcher, WatchConfig, WatchError};
    use flowloom_workflow::JsonMap;
    use rootcause::Report;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct EmptyTable;

    #[async_trait]
    impl ChangeSource for EmptyTable {
        fn supports_notify(&self) -> bool {
            false
        }

        async fn subscribe(
            &self,
            config: &WatchConfig,
        ) -> Result<mpsc::Receiver<ChangeEvent>, Report<WatchError>> {
            Err(WatchError::NotifyUnsupported {
                table: config.qualified_table(),
            }
            .into())
        }

        async fn poll(
            &self,
            _config: &WatchConfig,
            _since: Option<DateTime<Utc>>,
            _limit: usize,
        ) -> Result<Vec<JsonMap>, Report<WatchError>> {
            Ok(Vec::new())
        }
    }

    fn with_watcher() -> TestApp {
        let mut app = TestApp::new();
        app.state.watcher = Some(Arc::new(ChangeWatcher::new(
            Arc::new(EmptyTable),
            Arc::new(app.state.run_queue.clone()),
        )));
        app
    }

    #[tokio::test]
    async fn unavailable_without_database() {
        let app = TestApp::new();
        let (status, _) = app.call(Method::GET, "/api/watches", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn create_list_and_remove() {
        let app = with_watcher();
        let workflow_id = WorkflowId::new();
        app.call(
            Method::PUT,
            &format!("/api/workflows/{workflow_id}"),
            Some(greeting_graph()),
        )
        .await;

        let (status, created) = app
            .call(
                Method::POST,
                "/api/watches",
                Some(json!({"workflowId": workflow_id, "table": "orders", "operations": ["INSERT"]})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let watch_id = created["watchId"].as_str().expect("watch id").to_string();

        let (_, watches) = app.call(Method::GET, "/api/watches", None).await;
        assert_eq!(watches[0]["config"]["table"], json!("orders"));
        assert_eq!(watches[0]["config"]["pollIntervalMs"], json!(5000));
        assert_eq!(watches[0]["mode"], json!("poll"));

        let uri = format!("/api/watches/{watch_id}");
        let (status, _) = app.call(Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app.call(Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn rejects_unsafe_table_names() {
        let app = with_watcher();
        let workflow_id = WorkflowId::new();
        app.call(
            Method::PUT,
            &format!("/api/workflows/{workflow_id}"),
            Some(greeting_graph()),
        )
        .await;

        let (status, _) = app
            .call(
                Method::POST,
                "/api/watches",
                Some(json!({"workflowId": workflow_id, "table": "orders; drop table users"})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
