//! Task API handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use pagepilot_core::{ErrorDetails, Task, TaskKind, TaskResult, TaskSpec, TaskStatus};

use crate::error::ApiError;
use crate::state::AppState;

/// Request to submit a task.
///
/// The spec itself is flattened: `{"kind": "parse", "url": ...}` or
/// `{"kind": "execute", "plan": ...}`.
#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    /// Owner the task is submitted under; selects webhook endpoints.
    #[serde(default = "default_owner")]
    pub owner: String,

    /// The work to perform.
    #[serde(flatten)]
    pub spec: TaskSpec,
}

fn default_owner() -> String {
    "default".to_string()
}

/// Response to a task submission.
#[derive(Debug, Serialize)]
pub struct SubmitTaskResponse {
    /// Assigned task ID.
    pub task_id: Uuid,
    /// Initial status, always `queued`.
    pub status: TaskStatus,
    /// Parse or execute.
    pub kind: TaskKind,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Task status response.
#[derive(Debug, Serialize)]
pub struct TaskStatusResponse {
    pub task_id: Uuid,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub progress_percentage: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
    /// Whether a result (possibly partial) can be fetched.
    pub has_result: bool,
}

impl From<Task> for TaskStatusResponse {
    fn from(task: Task) -> Self {
        Self {
            task_id: task.id,
            kind: task.kind,
            status: task.status,
            progress_percentage: task.progress_percentage,
            current_step: task.current_step,
            retry_count: task.retry_count,
            max_retries: task.max_retries,
            created_at: task.created_at,
            started_at: task.started_at,
            completed_at: task.completed_at,
            error: task.error_details,
            has_result: task.result_ref.is_some(),
        }
    }
}

/// Response to a cancellation request.
#[derive(Debug, Serialize)]
pub struct CancelTaskResponse {
    /// Whether cancellation was requested; `false` for terminal tasks.
    pub cancelled: bool,
}

/// `POST /tasks`
pub async fn submit_task(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmitTaskRequest>,
) -> Result<(StatusCode, Json<SubmitTaskResponse>), ApiError> {
    let task = state
        .coordinator
        .submit(request.spec, request.owner)
        .await?;
    info!("Accepted task {} ({:?})", task.id, task.kind);
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitTaskResponse {
            task_id: task.id,
            status: task.status,
            kind: task.kind,
            created_at: task.created_at,
        }),
    ))
}

/// `GET /tasks/{id}`
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    let task = state
        .coordinator
        .status(&id)
        .await?
        .ok_or(ApiError::TaskNotFound(id))?;
    Ok(Json(task.into()))
}

/// `GET /tasks/{id}/result`
pub async fn get_task_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskResult>, ApiError> {
    let task = state
        .coordinator
        .status(&id)
        .await?
        .ok_or(ApiError::TaskNotFound(id))?;
    match state.coordinator.result(&id) {
        Some(result) => Ok(Json(result)),
        None if task.status.is_terminal() => Err(ApiError::ResultMissing(id)),
        None => Err(ApiError::ResultNotReady(id)),
    }
}

/// `POST /tasks/{id}/cancel`
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelTaskResponse>, ApiError> {
    if state.coordinator.status(&id).await?.is_none() {
        return Err(ApiError::TaskNotFound(id));
    }
    let cancelled = state.coordinator.cancel(&id).await?;
    Ok(Json(CancelTaskResponse { cancelled }))
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let stats = state.coordinator.pool_stats();
    Json(json!({
        "status": "ok",
        "uptime_secs": state.uptime().as_secs(),
        "pool": {
            "active": stats.active,
            "idle": stats.idle,
            "waiting": stats.waiting,
        },
    }))
}
