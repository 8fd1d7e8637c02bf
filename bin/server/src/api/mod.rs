//! HTTP API.
//!
//! | route                                   | handler                  |
//! |-----------------------------------------|--------------------------|
//! | `POST /api/runs`                        | [`runs::submit`]         |
//! | `GET /api/runs/active`                  | [`runs::active`]         |
//! | `GET /api/runs/{runId}`                 | [`runs::get`]            |
//! | `POST /api/runs/{runId}/cancel`         | [`runs::cancel`]         |
//! | `GET /api/runs/{runId}/events`          | [`events::stream`]       |
//! | `PUT /api/workflows/{workflowId}`       | [`workflows::register`]  |
//! | `DELETE /api/workflows/{workflowId}`    | [`workflows::remove`]    |
//! | `GET /api/workflows/{workflowId}/runs`  | [`workflows::runs`]      |
//! | `POST /api/workflows/{workflowId}/jobs` | [`workflows::enqueue`]   |
//! | `GET/POST /api/schedules`               | [`schedules`]            |
//! | `DELETE /api/schedules/{workflowId}`    | [`schedules::remove`]    |
//! | `GET/POST /api/watches`                 | [`watches`]              |
//! | `DELETE /api/watches/{watchId}`         | [`watches::remove`]      |
//! | `GET /api/nodes`                        | [`nodes::list`]          |
//! | `POST /api/nodes/{typeId}/validate`     | [`nodes::validate`]      |
//! | `GET /health`                           | [`health`]               |

pub mod events;
pub mod nodes;
pub mod runs;
pub mod schedules;
pub mod watches;
pub mod workflows;

use crate::error::ApiError;
use crate::state::AppState;
use axum::Json;
use axum::Router;
use axum::routing::{delete, get, post, put};
use serde_json::{Value as JsonValue, json};
use std::str::FromStr;
use tower_http::trace::TraceLayer;

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/runs", post(runs::submit))
        .route("/api/runs/active", get(runs::active))
        .route("/api/runs/{run_id}", get(runs::get))
        .route("/api/runs/{run_id}/cancel", post(runs::cancel))
        .route("/api/runs/{run_id}/events", get(events::stream))
        .route(
            "/api/workflows/{workflow_id}",
            put(workflows::register).delete(workflows::remove),
        )
        .route("/api/workflows/{workflow_id}/runs", get(workflows::runs))
        .route("/api/workflows/{workflow_id}/jobs", post(workflows::enqueue))
        .route("/api/schedules", get(schedules::list).post(schedules::create))
        .route("/api/schedules/{workflow_id}", delete(schedules::remove))
        .route("/api/watches", get(watches::list).post(watches::create))
        .route("/api/watches/{watch_id}", delete(watches::remove))
        .route("/api/nodes", get(nodes::list))
        .route("/api/nodes/{type_id}/validate", post(nodes::validate))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness probe.
pub async fn health() -> Json<JsonValue> {
    Json(json!({ "status": "ok" }))
}

/// Parses a prefixed id taken from the path.
fn parse_id<T>(kind: &'static str, raw: &str) -> Result<T, ApiError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| ApiError::bad_request(format!("invalid {kind} id '{raw}': {e}")))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use flowloom_queue::{InMemoryJobQueue, InMemoryWorkflowSource, RunQueue};
    use flowloom_scheduler::TriggerScheduler;
    use flowloom_workflow::{InMemoryRunStore, RunStore, WorkflowEngine};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    pub struct TestApp {
        pub state: AppState,
        pub queue: Arc<InMemoryJobQueue>,
    }

    impl TestApp {
        pub fn new() -> Self {
            let registry = crate::app::node_registry();
            let runs: Arc<dyn RunStore> = Arc::new(InMemoryRunStore::new());
            let engine = Arc::new(WorkflowEngine::new(Arc::new(registry), Arc::clone(&runs)));
            let queue = Arc::new(InMemoryJobQueue::new(Duration::from_secs(30)));
            let run_queue = RunQueue::new(queue.clone(), runs);
            let scheduler = Arc::new(TriggerScheduler::new(Arc::new(run_queue.clone())));

            Self {
                state: AppState {
                    engine,
                    run_queue,
                    workflows: InMemoryWorkflowSource::new(),
                    scheduler,
                    watcher: None,
                    ping_interval: Duration::from_secs(15),
                    default_watch_poll_interval_ms: 5000,
                    shutdown: CancellationToken::new(),
                },
                queue,
            }
        }

        pub async fn call(
            &self,
            method: Method,
            uri: &str,
            body: Option<JsonValue>,
        ) -> (StatusCode, JsonValue) {
            let request = Request::builder().method(method).uri(uri);
            let request = match body {
                Some(body) => request
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string())),
                None => request.body(Body::empty()),
            }
            .expect("request");

            let response = router(self.state.clone())
                .oneshot(request)
                .await
                .expect("response");
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .expect("body");
            let json = if bytes.is_empty() {
                JsonValue::Null
            } else {
                serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null)
            };
            (status, json)
        }
    }

    pub fn greeting_graph() -> JsonValue {
        json!({
            "nodes": [
                {"id": "start", "typeId": "trigger.manual"},
                {"id": "set", "typeId": "data.set", "config": {"values": {"greeting": "hi"}}}
            ],
            "edges": [{"sourceId": "start", "targetId": "set"}]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::testing::TestApp;
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn health_reports_ok() {
        let app = TestApp::new();
        let (status, body) = app.call(Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok"}));
    }
}
