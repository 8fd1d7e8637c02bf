//! Cron and interval schedules.

use super::parse_id;
use crate::error::ApiError;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use flowloom_core::WorkflowId;
use flowloom_scheduler::{IntervalSchedule, ScheduledTask};
use serde::Deserialize;

/// Body of `POST /api/schedules`. Exactly one of `cronExpression` and
/// `interval` must be set.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSchedule {
    pub workflow_id: WorkflowId,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub interval: Option<IntervalSchedule>,
    /// IANA name; UTC when absent.
    #[serde(default)]
    pub timezone: Option<String>,
}

pub async fn list(State(state): State<AppState>) -> Json<Vec<ScheduledTask>> {
    Json(state.scheduler.scheduled_tasks().await)
}

/// Schedules a registered workflow, replacing its previous schedule.
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateSchedule>,
) -> Result<(StatusCode, Json<ScheduledTask>), ApiError> {
    if !state.workflows.contains(request.workflow_id).await {
        return Err(ApiError::not_found("workflow", request.workflow_id));
    }

    let timezone = request.timezone.as_deref();
    let scheduled = match (request.cron_expression, request.interval) {
        (Some(expression), None) => {
            state
                .scheduler
                .schedule_workflow(request.workflow_id, &expression, timezone)
                .await
        }
        (None, Some(interval)) => {
            state
                .scheduler
                .schedule_interval(request.workflow_id, interval, timezone)
                .await
        }
        _ => {
            return Err(ApiError::bad_request(
                "exactly one of 'cronExpression' and 'interval' is required",
            ));
        }
    };

    let task = scheduled.map_err(|report| ApiError::bad_request(report.to_string()))?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let workflow_id: WorkflowId = parse_id("workflow", &workflow_id)?;
    if state.scheduler.unschedule_workflow(workflow_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("schedule", workflow_id))
    }
}
