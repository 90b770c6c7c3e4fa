/// Execution endpoints
///
/// # Endpoints
///
/// - `POST /tasks/{id}/executions` — start a run (task flips to `running`)
/// - `GET /tasks/{id}/executions` — list a task's executions, oldest first
/// - `GET /executions/{id}` — fetch
/// - `PUT /executions/{id}` — non-terminal progress update
/// - `DELETE /executions/{id}` — cancel; the task returns to `pending`

use super::tasks::ListQuery;
use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use runforge_shared::auth::middleware::AuthContext;
use runforge_shared::models::TaskExecution;
use runforge_shared::store::pagination::{SortField, SortOrder};
use serde::Deserialize;
use uuid::Uuid;

/// Progress update request; absent fields stay unchanged
#[derive(Debug, Deserialize)]
pub struct UpdateExecutionRequest {
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub return_code: Option<i32>,
    pub execution_time_ms: Option<i64>,
    pub memory_usage_bytes: Option<i64>,
}

/// Starts a new execution for a task
///
/// # Errors
///
/// - `404` unknown task, `403` foreign task
/// - `409` when the task is already running or is `completed`
pub async fn create_execution(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(task_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<TaskExecution>)> {
    let execution = state
        .executions
        .create_execution(task_id, auth.user_id)
        .await?;
    Ok((StatusCode::CREATED, Json(execution)))
}

/// Lists a task's executions, ordered by creation
///
/// Cursor listings only sort on `created_at`/`updated_at`; priority and
/// name are task attributes.
pub async fn list_executions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(task_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Response> {
    if query.wants_cursor() {
        let sort_field = query.sort_field()?;
        if !matches!(sort_field, SortField::CreatedAt | SortField::UpdatedAt) {
            return Err(ApiError::BadRequest(format!(
                "executions cannot be sorted by {}",
                sort_field
            )));
        }
        let cursor_query = query.cursor_query(SortOrder::Asc)?;
        let page = state
            .executions
            .list_executions_cursor(task_id, auth.user_id, &cursor_query)
            .await?;
        return Ok(Json(page).into_response());
    }

    let page = state
        .executions
        .list_executions(task_id, auth.user_id, &query.pagination())
        .await?;
    Ok(Json(page).into_response())
}

/// Fetches one execution
pub async fn get_execution(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(execution_id): Path<Uuid>,
) -> ApiResult<Json<TaskExecution>> {
    let execution = state
        .executions
        .get_execution(execution_id, auth.user_id)
        .await?;
    Ok(Json(execution))
}

/// Applies a non-terminal progress update to an execution
///
/// # Errors
///
/// `409` once the execution has reached a terminal status.
pub async fn update_execution(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(execution_id): Path<Uuid>,
    Json(req): Json<UpdateExecutionRequest>,
) -> ApiResult<Json<TaskExecution>> {
    let mut execution = state
        .executions
        .get_execution(execution_id, auth.user_id)
        .await?;

    if let Some(stdout) = req.stdout {
        execution.stdout = Some(stdout);
    }
    if let Some(stderr) = req.stderr {
        execution.stderr = Some(stderr);
    }
    if let Some(return_code) = req.return_code {
        execution.return_code = Some(return_code);
    }
    if let Some(execution_time_ms) = req.execution_time_ms {
        execution.execution_time_ms = Some(execution_time_ms);
    }
    if let Some(memory_usage_bytes) = req.memory_usage_bytes {
        execution.memory_usage_bytes = Some(memory_usage_bytes);
    }

    state
        .executions
        .update_progress(&execution, auth.user_id)
        .await?;

    let execution = state
        .executions
        .get_execution(execution_id, auth.user_id)
        .await?;
    Ok(Json(execution))
}

/// Cancels a non-terminal execution; the task becomes re-runnable
pub async fn cancel_execution(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(execution_id): Path<Uuid>,
) -> ApiResult<Json<TaskExecution>> {
    let execution = state
        .executions
        .cancel_execution(execution_id, auth.user_id)
        .await?;
    Ok(Json(execution))
}
