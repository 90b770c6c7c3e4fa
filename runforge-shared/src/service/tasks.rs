/// Task service
///
/// Ownership checks and the running-task mutation guard live here so the
/// HTTP handlers stay thin. A task with a live execution cannot be updated
/// or deleted; everything else is plain CRUD over the repositories.

use super::{commit_or_rollback, ServiceError, ServiceResult};
use crate::models::{NewTask, ScriptType, Task, TaskStatus};
use crate::store::pagination::{CursorPage, CursorQuery, OffsetPage, Pagination};
use crate::store::{Repositories, Store};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

/// Mutable task fields for updates; `None` leaves a field unchanged
#[derive(Debug, Clone, Default)]
pub struct TaskChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub script_content: Option<String>,
    pub script_type: Option<ScriptType>,
    pub priority: Option<i32>,
    pub timeout_seconds: Option<i32>,
    pub metadata: Option<JsonValue>,
}

/// Task service
#[derive(Clone)]
pub struct TaskService {
    store: Arc<dyn Store>,
}

impl TaskService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        TaskService { store }
    }

    /// Creates a task in `pending` status
    ///
    /// Input validation (name character class, script deny-list, bounds)
    /// happens at the API boundary; the service only persists.
    pub async fn create_task(&self, task: NewTask) -> ServiceResult<Task> {
        let task = self.store.repos().tasks().create(task).await?;
        tracing::info!(task_id = %task.id, name = %task.name, "task created");
        Ok(task)
    }

    /// Fetches a task, enforcing ownership
    pub async fn get_task(&self, task_id: Uuid, user_id: Uuid) -> ServiceResult<Task> {
        get_owned_task(self.store.repos(), task_id, user_id).await
    }

    /// Lists the user's tasks by offset, newest first
    pub async fn list_tasks(
        &self,
        user_id: Uuid,
        page: &Pagination,
    ) -> ServiceResult<OffsetPage<Task>> {
        let repos = self.store.repos();
        let items = repos.tasks().list_by_user(user_id, page).await?;
        let total = repos.tasks().count_by_user(user_id).await?;
        Ok(OffsetPage {
            items,
            total,
            limit: page.limit,
            offset: page.offset,
        })
    }

    /// Lists the user's tasks by cursor
    pub async fn list_tasks_cursor(
        &self,
        user_id: Uuid,
        query: &CursorQuery,
    ) -> ServiceResult<CursorPage<Task>> {
        Ok(self
            .store
            .repos()
            .tasks()
            .list_by_user_cursor(user_id, query)
            .await?)
    }

    /// Applies field updates to a task
    ///
    /// Refused with `Conflict` while the task is running; id, owner and
    /// creation time are immutable by construction.
    pub async fn update_task(
        &self,
        task_id: Uuid,
        user_id: Uuid,
        changes: TaskChanges,
    ) -> ServiceResult<Task> {
        let tx = self.store.begin().await?;
        let result = update_task_in(tx.repos(), task_id, user_id, changes).await;
        commit_or_rollback(tx, result).await
    }

    /// Deletes a task and, by cascade, its executions
    ///
    /// Refused with `Conflict` while the task is running.
    pub async fn delete_task(&self, task_id: Uuid, user_id: Uuid) -> ServiceResult<()> {
        let tx = self.store.begin().await?;
        let result = delete_task_in(tx.repos(), task_id, user_id).await;
        commit_or_rollback(tx, result).await?;

        tracing::info!(task_id = %task_id, "task deleted");
        Ok(())
    }
}

async fn get_owned_task(
    repos: &dyn Repositories,
    task_id: Uuid,
    user_id: Uuid,
) -> ServiceResult<Task> {
    let task = repos
        .tasks()
        .get_by_id(task_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("task not found".to_string()))?;
    if task.user_id != user_id {
        return Err(ServiceError::Forbidden(
            "task belongs to another user".to_string(),
        ));
    }
    Ok(task)
}

async fn update_task_in(
    repos: &dyn Repositories,
    task_id: Uuid,
    user_id: Uuid,
    changes: TaskChanges,
) -> ServiceResult<Task> {
    let mut task = get_owned_task(repos, task_id, user_id).await?;

    if task.status == TaskStatus::Running {
        return Err(ServiceError::Conflict(
            "cannot update a running task".to_string(),
        ));
    }

    if let Some(name) = changes.name {
        task.name = name;
    }
    if let Some(description) = changes.description {
        task.description = Some(description);
    }
    if let Some(script_content) = changes.script_content {
        task.script_content = script_content;
    }
    if let Some(script_type) = changes.script_type {
        task.script_type = script_type;
    }
    if let Some(priority) = changes.priority {
        task.priority = priority;
    }
    if let Some(timeout_seconds) = changes.timeout_seconds {
        task.timeout_seconds = timeout_seconds;
    }
    if let Some(metadata) = changes.metadata {
        task.metadata = Some(metadata);
    }

    repos.tasks().update(&task).await?;
    get_owned_task(repos, task_id, user_id).await
}

async fn delete_task_in(
    repos: &dyn Repositories,
    task_id: Uuid,
    user_id: Uuid,
) -> ServiceResult<()> {
    let task = get_owned_task(repos, task_id, user_id).await?;

    if task.status == TaskStatus::Running {
        return Err(ServiceError::Conflict(
            "cannot delete a running task".to_string(),
        ));
    }

    repos.tasks().delete(task_id).await?;
    Ok(())
}
