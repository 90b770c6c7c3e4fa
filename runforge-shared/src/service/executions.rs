/// Execution lifecycle service
///
/// The only mutation path for executions and the task statuses they imply.
/// Every operation re-reads the affected rows inside the transaction before
/// mutating, so the two-row invariants hold even when the backing store
/// runs at READ COMMITTED; conditional status updates make concurrent
/// losers fail with a `Conflict` instead of corrupting state.
///
/// # Status mapping on finalize
///
/// ```text
/// execution completed  → task completed
/// execution failed     → task failed
/// execution timeout    → task timeout
/// execution cancelled  → task cancelled
/// ```
///
/// Any other combination is rejected loudly; there is deliberately no
/// silent fallback for an unmapped terminal status.

use super::{commit_or_rollback, ServiceError, ServiceResult};
use crate::models::{ExecutionStatus, NewExecution, TaskExecution, TaskStatus};
use crate::store::pagination::{CursorPage, CursorQuery, OffsetPage, Pagination};
use crate::store::{Repositories, Store};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Execution lifecycle service
#[derive(Clone)]
pub struct ExecutionService {
    store: Arc<dyn Store>,
}

impl ExecutionService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        ExecutionService { store }
    }

    /// Creates a new execution for a task and flips the task to `running`
    ///
    /// # Preconditions
    ///
    /// - task exists and belongs to `user_id`
    /// - task is not already running and not `completed`
    ///
    /// # Errors
    ///
    /// `NotFound`, `Forbidden`, or `Conflict` describing the offending
    /// status. Exactly one of two concurrent calls for the same task
    /// succeeds; the loser sees the conflict.
    pub async fn create_execution(
        &self,
        task_id: Uuid,
        user_id: Uuid,
    ) -> ServiceResult<TaskExecution> {
        let tx = self.store.begin().await?;
        let result = create_execution_in(tx.repos(), task_id, user_id).await;
        let execution = commit_or_rollback(tx, result).await?;

        tracing::info!(
            execution_id = %execution.id,
            task_id = %task_id,
            "execution created, task now running"
        );
        Ok(execution)
    }

    /// Cancels a non-terminal execution and re-queues its task
    ///
    /// The task returns to `pending` so the user may re-run it. Cancelling
    /// twice yields one success and one `Conflict`, with the same final
    /// state as a single call.
    pub async fn cancel_execution(
        &self,
        execution_id: Uuid,
        user_id: Uuid,
    ) -> ServiceResult<TaskExecution> {
        let tx = self.store.begin().await?;
        let result = cancel_execution_in(tx.repos(), execution_id, user_id).await;
        let execution = commit_or_rollback(tx, result).await?;

        tracing::info!(execution_id = %execution_id, "execution cancelled, task re-queued");
        Ok(execution)
    }

    /// Persists a finished execution and derives the task status
    ///
    /// `execution` must carry a terminal status and the collected output
    /// fields; `task_status` must match the finalize mapping. A stored
    /// status of `completed` or `cancelled` rejects the finalize — the
    /// worker treats that as a non-fatal discard (the user got there
    /// first).
    pub async fn finalize_execution(
        &self,
        execution: &TaskExecution,
        task_status: TaskStatus,
        user_id: Uuid,
    ) -> ServiceResult<()> {
        let mapped = execution.status.task_status().ok_or_else(|| {
            ServiceError::Internal(format!(
                "finalize with non-terminal execution status: {}",
                execution.status
            ))
        })?;
        if mapped != task_status {
            return Err(ServiceError::Internal(format!(
                "finalize mapping violation: execution status {} does not imply task status {}",
                execution.status, task_status
            )));
        }

        let tx = self.store.begin().await?;
        let result = finalize_execution_in(tx.repos(), execution, task_status, user_id).await;
        commit_or_rollback(tx, result).await?;

        tracing::info!(
            execution_id = %execution.id,
            status = %execution.status,
            "execution finalized"
        );
        Ok(())
    }

    /// Persists a non-terminal execution update (e.g. streamed output)
    ///
    /// Only the execution row changes, so this path skips the cross-row
    /// transaction.
    pub async fn update_progress(
        &self,
        execution: &TaskExecution,
        user_id: Uuid,
    ) -> ServiceResult<()> {
        if execution.status.is_terminal() {
            return Err(ServiceError::Conflict(
                "progress updates cannot set a terminal status".to_string(),
            ));
        }

        let repos = self.store.repos();
        let stored = get_execution(repos, execution.id).await?;
        let task = get_owned_task(repos, stored.task_id, user_id).await?;
        debug_assert_eq!(task.id, stored.task_id);

        if stored.status.is_terminal() {
            return Err(ServiceError::Conflict(format!(
                "cannot update execution with status: {}",
                stored.status
            )));
        }

        repos.executions().update(execution).await?;
        Ok(())
    }

    /// Fetches an execution, checking ownership through its task
    pub async fn get_execution(
        &self,
        execution_id: Uuid,
        user_id: Uuid,
    ) -> ServiceResult<TaskExecution> {
        let repos = self.store.repos();
        let execution = get_execution(repos, execution_id).await?;
        get_owned_task(repos, execution.task_id, user_id).await?;
        Ok(execution)
    }

    /// Lists a task's executions by offset, oldest first
    pub async fn list_executions(
        &self,
        task_id: Uuid,
        user_id: Uuid,
        page: &Pagination,
    ) -> ServiceResult<OffsetPage<TaskExecution>> {
        let repos = self.store.repos();
        get_owned_task(repos, task_id, user_id).await?;

        let items = repos.executions().list_by_task(task_id, page).await?;
        let total = repos.executions().count_by_task(task_id).await?;
        Ok(OffsetPage {
            items,
            total,
            limit: page.limit,
            offset: page.offset,
        })
    }

    /// Lists a task's executions by cursor
    pub async fn list_executions_cursor(
        &self,
        task_id: Uuid,
        user_id: Uuid,
        query: &CursorQuery,
    ) -> ServiceResult<CursorPage<TaskExecution>> {
        let repos = self.store.repos();
        get_owned_task(repos, task_id, user_id).await?;
        Ok(repos
            .executions()
            .list_by_task_cursor(task_id, query)
            .await?)
    }
}

async fn get_execution(
    repos: &dyn Repositories,
    execution_id: Uuid,
) -> ServiceResult<TaskExecution> {
    repos
        .executions()
        .get_by_id(execution_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("execution not found".to_string()))
}

async fn get_owned_task(
    repos: &dyn Repositories,
    task_id: Uuid,
    user_id: Uuid,
) -> ServiceResult<crate::models::Task> {
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

async fn create_execution_in(
    repos: &dyn Repositories,
    task_id: Uuid,
    user_id: Uuid,
) -> ServiceResult<TaskExecution> {
    let task = get_owned_task(repos, task_id, user_id).await?;

    if task.status == TaskStatus::Running {
        return Err(ServiceError::Conflict("task is already running".to_string()));
    }
    if !task.status.can_start_execution() {
        return Err(ServiceError::Conflict(format!(
            "cannot execute task with status: {}",
            task.status
        )));
    }

    let execution = repos.executions().create(NewExecution { task_id }).await?;

    // Conditional on the status we just read; if a concurrent transaction
    // raced us here, we lose and roll back the insert
    let moved = repos
        .tasks()
        .update_status(task_id, Some(task.status), TaskStatus::Running)
        .await?;
    if !moved {
        return Err(ServiceError::Conflict("task is already running".to_string()));
    }

    Ok(execution)
}

async fn cancel_execution_in(
    repos: &dyn Repositories,
    execution_id: Uuid,
    user_id: Uuid,
) -> ServiceResult<TaskExecution> {
    let execution = get_execution(repos, execution_id).await?;
    let task = get_owned_task(repos, execution.task_id, user_id).await?;

    if execution.status.is_terminal() {
        return Err(ServiceError::Conflict(format!(
            "cannot cancel execution with status: {}",
            execution.status
        )));
    }

    let moved = repos
        .executions()
        .update_status(
            execution_id,
            Some(execution.status),
            ExecutionStatus::Cancelled,
        )
        .await?;
    if !moved {
        let current = get_execution(repos, execution_id).await?;
        return Err(ServiceError::Conflict(format!(
            "cannot cancel execution with status: {}",
            current.status
        )));
    }

    // The task becomes re-runnable
    repos
        .tasks()
        .update_status(task.id, None, TaskStatus::Pending)
        .await?;

    get_execution(repos, execution_id).await
}

async fn finalize_execution_in(
    repos: &dyn Repositories,
    execution: &TaskExecution,
    task_status: TaskStatus,
    user_id: Uuid,
) -> ServiceResult<()> {
    let stored = get_execution(repos, execution.id).await?;
    let task = get_owned_task(repos, stored.task_id, user_id).await?;

    if matches!(
        stored.status,
        ExecutionStatus::Completed | ExecutionStatus::Cancelled
    ) {
        return Err(ServiceError::Conflict(format!(
            "cannot complete execution with status: {}",
            stored.status
        )));
    }

    // Terminal executions always carry a completion time
    let mut row = execution.clone();
    if row.completed_at.is_none() {
        row.completed_at = Some(Utc::now());
    }

    repos.executions().update(&row).await?;
    repos
        .tasks()
        .update_status(task.id, None, task_status)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewTask, ScriptType};
    use crate::store::memory::MemoryStore;

    struct Fixture {
        store: Arc<dyn Store>,
        service: ExecutionService,
        user_id: Uuid,
    }

    impl Fixture {
        fn new() -> Self {
            let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
            let service = ExecutionService::new(store.clone());
            Fixture {
                store,
                service,
                user_id: Uuid::new_v4(),
            }
        }

        async fn create_task(&self) -> crate::models::Task {
            self.store
                .repos()
                .tasks()
                .create(NewTask {
                    user_id: self.user_id,
                    name: "demo".to_string(),
                    description: None,
                    script_content: "print(1)".to_string(),
                    script_type: ScriptType::Python,
                    priority: 5,
                    timeout_seconds: 60,
                    metadata: None,
                })
                .await
                .unwrap()
        }

        async fn task_status(&self, id: Uuid) -> TaskStatus {
            self.store
                .repos()
                .tasks()
                .get_by_id(id)
                .await
                .unwrap()
                .unwrap()
                .status
        }
    }

    #[tokio::test]
    async fn test_create_execution_flips_task_to_running() {
        let fx = Fixture::new();
        let task = fx.create_task().await;

        let execution = fx
            .service
            .create_execution(task.id, fx.user_id)
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Pending);
        assert_eq!(fx.task_status(task.id).await, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_create_execution_rejects_running_task() {
        let fx = Fixture::new();
        let task = fx.create_task().await;
        fx.service
            .create_execution(task.id, fx.user_id)
            .await
            .unwrap();

        let err = fx
            .service
            .create_execution(task.id, fx.user_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(ref m) if m.contains("already running")));

        // Exactly one non-terminal execution exists
        let executions = fx
            .store
            .repos()
            .executions()
            .list_by_task(task.id, &Pagination::default())
            .await
            .unwrap();
        let active = executions.iter().filter(|e| !e.status.is_terminal()).count();
        assert_eq!(active, 1);
    }

    #[tokio::test]
    async fn test_create_execution_rejects_completed_task() {
        let fx = Fixture::new();
        let task = fx.create_task().await;
        fx.store
            .repos()
            .tasks()
            .update_status(task.id, None, TaskStatus::Completed)
            .await
            .unwrap();

        let err = fx
            .service
            .create_execution(task.id, fx.user_id)
            .await
            .unwrap_err();
        assert!(
            matches!(err, ServiceError::Conflict(ref m) if m.contains("cannot execute task with status: completed"))
        );
    }

    #[tokio::test]
    async fn test_create_execution_allows_rerun_after_failure() {
        let fx = Fixture::new();
        let task = fx.create_task().await;
        fx.store
            .repos()
            .tasks()
            .update_status(task.id, None, TaskStatus::Failed)
            .await
            .unwrap();

        let execution = fx
            .service
            .create_execution(task.id, fx.user_id)
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Pending);
        assert_eq!(fx.task_status(task.id).await, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_create_execution_forbidden_for_other_user() {
        let fx = Fixture::new();
        let task = fx.create_task().await;

        let err = fx
            .service
            .create_execution(task.id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
        // Nothing changed
        assert_eq!(fx.task_status(task.id).await, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_cancel_requeues_task() {
        let fx = Fixture::new();
        let task = fx.create_task().await;
        let execution = fx
            .service
            .create_execution(task.id, fx.user_id)
            .await
            .unwrap();

        let cancelled = fx
            .service
            .cancel_execution(execution.id, fx.user_id)
            .await
            .unwrap();
        assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
        assert!(cancelled.completed_at.is_some());
        assert_eq!(fx.task_status(task.id).await, TaskStatus::Pending);

        // The task is re-runnable
        fx.service
            .create_execution(task.id, fx.user_id)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_twice_is_one_success_one_conflict() {
        let fx = Fixture::new();
        let task = fx.create_task().await;
        let execution = fx
            .service
            .create_execution(task.id, fx.user_id)
            .await
            .unwrap();

        fx.service
            .cancel_execution(execution.id, fx.user_id)
            .await
            .unwrap();
        let err = fx
            .service
            .cancel_execution(execution.id, fx.user_id)
            .await
            .unwrap_err();
        assert!(
            matches!(err, ServiceError::Conflict(ref m) if m.contains("cannot cancel execution with status: cancelled"))
        );

        // Final state identical to a single cancel
        let stored = fx
            .service
            .get_execution(execution.id, fx.user_id)
            .await
            .unwrap();
        assert_eq!(stored.status, ExecutionStatus::Cancelled);
        assert_eq!(fx.task_status(task.id).await, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_finalize_completes_task_and_execution() {
        let fx = Fixture::new();
        let task = fx.create_task().await;
        let execution = fx
            .service
            .create_execution(task.id, fx.user_id)
            .await
            .unwrap();
        fx.store
            .repos()
            .executions()
            .try_claim(execution.id)
            .await
            .unwrap();

        let mut finished = fx
            .service
            .get_execution(execution.id, fx.user_id)
            .await
            .unwrap();
        finished.status = ExecutionStatus::Completed;
        finished.return_code = Some(0);
        finished.stdout = Some("1\n".to_string());
        finished.execution_time_ms = Some(12);

        fx.service
            .finalize_execution(&finished, TaskStatus::Completed, fx.user_id)
            .await
            .unwrap();

        let stored = fx
            .service
            .get_execution(execution.id, fx.user_id)
            .await
            .unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert_eq!(stored.return_code, Some(0));
        assert_eq!(stored.stdout.as_deref(), Some("1\n"));
        assert!(stored.completed_at.is_some());
        assert_eq!(fx.task_status(task.id).await, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_finalize_after_cancel_conflicts() {
        let fx = Fixture::new();
        let task = fx.create_task().await;
        let execution = fx
            .service
            .create_execution(task.id, fx.user_id)
            .await
            .unwrap();
        fx.store
            .repos()
            .executions()
            .try_claim(execution.id)
            .await
            .unwrap();
        fx.service
            .cancel_execution(execution.id, fx.user_id)
            .await
            .unwrap();

        let mut finished = fx
            .service
            .get_execution(execution.id, fx.user_id)
            .await
            .unwrap();
        finished.status = ExecutionStatus::Completed;
        finished.return_code = Some(0);

        let err = fx
            .service
            .finalize_execution(&finished, TaskStatus::Completed, fx.user_id)
            .await
            .unwrap_err();
        assert!(
            matches!(err, ServiceError::Conflict(ref m) if m.contains("cannot complete execution with status: cancelled"))
        );

        // The cancel outcome stands
        assert_eq!(fx.task_status(task.id).await, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_finalize_rejects_mapping_violations() {
        let fx = Fixture::new();
        let task = fx.create_task().await;
        let execution = fx
            .service
            .create_execution(task.id, fx.user_id)
            .await
            .unwrap();

        // Non-terminal execution status
        let mut bogus = execution.clone();
        bogus.status = ExecutionStatus::Running;
        let err = fx
            .service
            .finalize_execution(&bogus, TaskStatus::Completed, fx.user_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Internal(_)));

        // Terminal status with the wrong task status
        let mut mismatched = execution.clone();
        mismatched.status = ExecutionStatus::Failed;
        let err = fx
            .service
            .finalize_execution(&mismatched, TaskStatus::Completed, fx.user_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Internal(_)));
    }

    #[tokio::test]
    async fn test_update_progress_only_touches_execution() {
        let fx = Fixture::new();
        let task = fx.create_task().await;
        let execution = fx
            .service
            .create_execution(task.id, fx.user_id)
            .await
            .unwrap();
        fx.store
            .repos()
            .executions()
            .try_claim(execution.id)
            .await
            .unwrap();

        let mut progress = fx
            .service
            .get_execution(execution.id, fx.user_id)
            .await
            .unwrap();
        progress.stdout = Some("partial output".to_string());
        fx.service
            .update_progress(&progress, fx.user_id)
            .await
            .unwrap();

        let stored = fx
            .service
            .get_execution(execution.id, fx.user_id)
            .await
            .unwrap();
        assert_eq!(stored.stdout.as_deref(), Some("partial output"));
        assert_eq!(stored.status, ExecutionStatus::Running);
        assert_eq!(fx.task_status(task.id).await, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_update_progress_rejects_terminal() {
        let fx = Fixture::new();
        let task = fx.create_task().await;
        let execution = fx
            .service
            .create_execution(task.id, fx.user_id)
            .await
            .unwrap();
        fx.service
            .cancel_execution(execution.id, fx.user_id)
            .await
            .unwrap();

        let mut progress = fx
            .service
            .get_execution(execution.id, fx.user_id)
            .await
            .unwrap();
        progress.status = ExecutionStatus::Running;
        progress.stdout = Some("late".to_string());

        let err = fx
            .service
            .update_progress(&progress, fx.user_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }
}
