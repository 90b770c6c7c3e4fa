/// Task endpoints
///
/// # Endpoints
///
/// - `POST /tasks` — create a task (validated, starts `pending`)
/// - `GET /tasks` — list with offset (`limit`, `offset`) or cursor
///   (`cursor`, `sort_field`, `sort_order`) pagination
/// - `GET /tasks/{id}` — fetch
/// - `PUT /tasks/{id}` — update mutable fields (409 while running)
/// - `DELETE /tasks/{id}` — delete (409 while running; executions cascade)

use crate::{
    app::AppState,
    error::{ApiError, ApiResult, FieldError},
    validation,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use runforge_shared::auth::middleware::AuthContext;
use runforge_shared::models::{NewTask, ScriptType, Task};
use runforge_shared::service::TaskChanges;
use runforge_shared::store::pagination::{CursorQuery, Pagination, SortField, SortOrder};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

/// Task creation request
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub name: String,
    pub description: Option<String>,
    pub script_content: String,
    pub script_type: String,
    pub priority: Option<i32>,
    pub timeout_seconds: Option<i32>,
    pub metadata: Option<JsonValue>,
}

/// Task update request; absent fields stay unchanged
#[derive(Debug, Deserialize)]
pub struct UpdateTaskRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub script_content: Option<String>,
    pub script_type: Option<String>,
    pub priority: Option<i32>,
    pub timeout_seconds: Option<i32>,
    pub metadata: Option<JsonValue>,
}

/// Listing query; cursor parameters switch the response shape
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub cursor: Option<String>,
    pub sort_field: Option<String>,
    pub sort_order: Option<String>,
}

impl ListQuery {
    pub fn wants_cursor(&self) -> bool {
        self.cursor.is_some() || self.sort_field.is_some() || self.sort_order.is_some()
    }

    pub fn sort_field(&self) -> ApiResult<SortField> {
        match &self.sort_field {
            Some(s) => s.parse().map_err(ApiError::BadRequest),
            None => Ok(SortField::CreatedAt),
        }
    }

    pub fn sort_order(&self, default: SortOrder) -> ApiResult<SortOrder> {
        match &self.sort_order {
            Some(s) => s.parse().map_err(ApiError::BadRequest),
            None => Ok(default),
        }
    }

    pub fn cursor_query(&self, default_order: SortOrder) -> ApiResult<CursorQuery> {
        CursorQuery::new(
            self.limit,
            self.cursor.as_deref(),
            self.sort_field()?,
            self.sort_order(default_order)?,
        )
        .map_err(|e| ApiError::BadRequest(e.to_string()))
    }

    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.limit, self.offset)
    }
}

fn parse_script_type(raw: &str, errors: &mut Vec<FieldError>) -> Option<ScriptType> {
    match raw.parse::<ScriptType>() {
        Ok(script_type) => Some(script_type),
        Err(_) => {
            errors.push(FieldError::new(
                "script_type",
                "must be one of: python, javascript, bash, go",
            ));
            None
        }
    }
}

/// Creates a task
pub async fn create_task(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateTaskRequest>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let limits = &state.config.limits;
    let mut errors = Vec::new();

    if let Err(reason) = validation::validate_task_name(&req.name) {
        errors.push(FieldError::new("name", reason));
    }
    if let Err(reason) = validation::validate_script_content(
        &req.script_content,
        &limits.script_deny_list,
        limits.max_script_bytes,
    ) {
        errors.push(FieldError::new("script_content", reason));
    }
    let script_type = parse_script_type(&req.script_type, &mut errors);

    let priority = req.priority.unwrap_or(runforge_shared::models::task::DEFAULT_PRIORITY);
    if let Err(reason) = validation::validate_priority(priority) {
        errors.push(FieldError::new("priority", reason));
    }
    let timeout_seconds = req
        .timeout_seconds
        .unwrap_or(runforge_shared::models::task::DEFAULT_TIMEOUT_SECONDS);
    if let Err(reason) = validation::validate_timeout_seconds(timeout_seconds) {
        errors.push(FieldError::new("timeout_seconds", reason));
    }

    let script_type = match script_type {
        Some(script_type) if errors.is_empty() => script_type,
        _ => return Err(ApiError::Validation(errors)),
    };

    let task = state
        .tasks
        .create_task(NewTask {
            user_id: auth.user_id,
            name: req.name,
            description: req.description,
            script_content: req.script_content,
            script_type,
            priority,
            timeout_seconds,
            metadata: req.metadata,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(task)))
}

/// Lists the caller's tasks, offset- or cursor-paginated
pub async fn list_tasks(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Response> {
    if query.wants_cursor() {
        let cursor_query = query.cursor_query(SortOrder::Desc)?;
        let page = state
            .tasks
            .list_tasks_cursor(auth.user_id, &cursor_query)
            .await?;
        return Ok(Json(page).into_response());
    }

    let page = state
        .tasks
        .list_tasks(auth.user_id, &query.pagination())
        .await?;
    Ok(Json(page).into_response())
}

/// Fetches one task
pub async fn get_task(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(task_id): Path<Uuid>,
) -> ApiResult<Json<Task>> {
    let task = state.tasks.get_task(task_id, auth.user_id).await?;
    Ok(Json(task))
}

/// Updates a task's mutable fields
pub async fn update_task(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(task_id): Path<Uuid>,
    Json(req): Json<UpdateTaskRequest>,
) -> ApiResult<Json<Task>> {
    let limits = &state.config.limits;
    let mut errors = Vec::new();

    if let Some(name) = &req.name {
        if let Err(reason) = validation::validate_task_name(name) {
            errors.push(FieldError::new("name", reason));
        }
    }
    if let Some(script_content) = &req.script_content {
        if let Err(reason) = validation::validate_script_content(
            script_content,
            &limits.script_deny_list,
            limits.max_script_bytes,
        ) {
            errors.push(FieldError::new("script_content", reason));
        }
    }
    let script_type = match &req.script_type {
        Some(raw) => parse_script_type(raw, &mut errors),
        None => None,
    };
    if let Some(priority) = req.priority {
        if let Err(reason) = validation::validate_priority(priority) {
            errors.push(FieldError::new("priority", reason));
        }
    }
    if let Some(timeout_seconds) = req.timeout_seconds {
        if let Err(reason) = validation::validate_timeout_seconds(timeout_seconds) {
            errors.push(FieldError::new("timeout_seconds", reason));
        }
    }

    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let task = state
        .tasks
        .update_task(
            task_id,
            auth.user_id,
            TaskChanges {
                name: req.name,
                description: req.description,
                script_content: req.script_content,
                script_type,
                priority: req.priority,
                timeout_seconds: req.timeout_seconds,
                metadata: req.metadata,
            },
        )
        .await?;

    Ok(Json(task))
}

/// Deletes a task and its executions
pub async fn delete_task(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(task_id): Path<Uuid>,
) -> ApiResult<Json<JsonValue>> {
    state.tasks.delete_task(task_id, auth.user_id).await?;
    Ok(Json(json!({ "message": "task deleted" })))
}
