/// Persistence abstraction
///
/// The rest of the system talks to storage exclusively through the traits in
/// this module. Two implementations exist:
///
/// - [`postgres::PgStore`] — the production backend (sqlx / PostgreSQL)
/// - [`memory::MemoryStore`] — an in-process backend used by tests
///
/// # Transactions
///
/// [`Store::begin`] opens a transaction and hands back a boxed
/// [`StoreTransaction`] exposing the same repository interfaces bound to
/// that transaction. Committing consumes it; dropping it without a commit
/// rolls back. Every multi-row mutation in the service layer goes through
/// this scope so task status and execution status can never be observed
/// disagreeing.

pub mod memory;
pub mod pagination;
pub mod postgres;

use crate::models::{
    ExecutionStatus, NewExecution, NewTask, NewUser, ScriptType, Task, TaskExecution, TaskStatus,
    User,
};
use async_trait::async_trait;
use pagination::{CursorPage, CursorQuery, Pagination};
use uuid::Uuid;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Task row missing
    #[error("task not found")]
    TaskNotFound,

    /// Execution row missing
    #[error("execution not found")]
    ExecutionNotFound,

    /// User row missing
    #[error("user not found")]
    UserNotFound,

    /// Email uniqueness violated
    #[error("email is already registered")]
    DuplicateEmail,

    /// Pagination cursor rejected
    #[error(transparent)]
    Cursor(#[from] pagination::CursorError),

    /// A stored value violated an invariant (e.g. unknown status)
    #[error("invalid value in store: {0}")]
    Invalid(String),

    /// Underlying database failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Transaction bookkeeping failure
    #[error("transaction error: {0}")]
    Transaction(String),
}

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// A pending execution joined with the task attributes the scheduler needs
#[derive(Debug, Clone)]
pub struct PendingExecution {
    /// The execution row
    pub execution: TaskExecution,

    /// Owner of the task (per-user slot fairness)
    pub user_id: Uuid,

    /// Task priority (already applied to the fetch order)
    pub priority: i32,

    /// Script to hand the executor
    pub script_content: String,

    /// Script language
    pub script_type: ScriptType,

    /// Per-execution timeout in seconds
    pub timeout_seconds: i32,
}

/// User persistence operations
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Inserts a new user; fails with `DuplicateEmail` on conflict
    async fn create(&self, user: NewUser) -> StoreResult<User>;

    /// Fetches a user by id
    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;

    /// Fetches a user by email, case-insensitively
    async fn get_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    /// Persists mutable user fields (name, password hash)
    async fn update(&self, user: &User) -> StoreResult<()>;
}

/// Task persistence operations
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Inserts a new task with status `pending`
    async fn create(&self, task: NewTask) -> StoreResult<Task>;

    /// Fetches a task by id
    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<Task>>;

    /// Persists the task's mutable fields (name, description, script,
    /// priority, timeout, metadata). Status changes go through
    /// [`TaskRepository::update_status`].
    async fn update(&self, task: &Task) -> StoreResult<()>;

    /// Conditionally updates the task status
    ///
    /// When `from` is given the update only applies while the stored status
    /// still matches, which is what makes concurrent state transitions lose
    /// cleanly. Returns whether a row changed.
    async fn update_status(
        &self,
        id: Uuid,
        from: Option<TaskStatus>,
        to: TaskStatus,
    ) -> StoreResult<bool>;

    /// Deletes a task (executions cascade). Returns whether a row existed.
    async fn delete(&self, id: Uuid) -> StoreResult<bool>;

    /// Lists a user's tasks by offset, newest first
    async fn list_by_user(&self, user_id: Uuid, page: &Pagination) -> StoreResult<Vec<Task>>;

    /// Lists a user's tasks by keyset cursor
    async fn list_by_user_cursor(
        &self,
        user_id: Uuid,
        query: &CursorQuery,
    ) -> StoreResult<CursorPage<Task>>;

    /// Lists tasks in a given status, newest first
    async fn list_by_status(
        &self,
        status: TaskStatus,
        page: &Pagination,
    ) -> StoreResult<Vec<Task>>;

    /// Counts a user's tasks
    async fn count_by_user(&self, user_id: Uuid) -> StoreResult<i64>;

    /// Counts a user's tasks in a given status
    async fn count_by_status(&self, user_id: Uuid, status: TaskStatus) -> StoreResult<i64>;
}

/// Execution persistence operations
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Inserts a new execution with status `pending`
    async fn create(&self, execution: NewExecution) -> StoreResult<TaskExecution>;

    /// Fetches an execution by id
    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<TaskExecution>>;

    /// Persists the full execution row (status, outputs, timings)
    async fn update(&self, execution: &TaskExecution) -> StoreResult<()>;

    /// Conditionally updates the execution status
    ///
    /// Transitioning into `running` stamps `started_at`; into a terminal
    /// status stamps `completed_at`; back to `pending` clears `started_at`.
    /// Returns whether a row changed.
    async fn update_status(
        &self,
        id: Uuid,
        from: Option<ExecutionStatus>,
        to: ExecutionStatus,
    ) -> StoreResult<bool>;

    /// Deletes an execution. Returns whether a row existed.
    async fn delete(&self, id: Uuid) -> StoreResult<bool>;

    /// Lists a task's executions by offset, oldest first
    async fn list_by_task(
        &self,
        task_id: Uuid,
        page: &Pagination,
    ) -> StoreResult<Vec<TaskExecution>>;

    /// Lists a task's executions by keyset cursor (created_at only)
    async fn list_by_task_cursor(
        &self,
        task_id: Uuid,
        query: &CursorQuery,
    ) -> StoreResult<CursorPage<TaskExecution>>;

    /// Fetches up to `limit` pending executions for dispatch, ordered by
    /// task priority descending then execution creation ascending
    async fn list_pending(&self, limit: i64) -> StoreResult<Vec<PendingExecution>>;

    /// Lists all executions currently marked running (startup reaping)
    async fn list_running(&self) -> StoreResult<Vec<TaskExecution>>;

    /// Atomically claims a pending execution for a worker
    ///
    /// Transitions `pending → running` and stamps `started_at` only if the
    /// stored status is still `pending`; the losing dispatcher of a race
    /// sees `false` and must release its slot.
    async fn try_claim(&self, id: Uuid) -> StoreResult<bool>;

    /// Counts a task's executions
    async fn count_by_task(&self, task_id: Uuid) -> StoreResult<i64>;
}

/// The repository bundle handed to callers, plain or transaction-bound
pub trait Repositories: Send + Sync {
    fn users(&self) -> &dyn UserRepository;
    fn tasks(&self) -> &dyn TaskRepository;
    fn executions(&self) -> &dyn ExecutionRepository;
}

/// An open transaction exposing transaction-bound repositories
///
/// Dropping the transaction without committing rolls it back.
#[async_trait]
pub trait StoreTransaction: Send + Sync {
    /// Repositories bound to this transaction
    fn repos(&self) -> &dyn Repositories;

    /// Commits the transaction
    async fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Rolls the transaction back explicitly
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// Top-level storage handle
#[async_trait]
pub trait Store: Send + Sync {
    /// Auto-committing repositories
    fn repos(&self) -> &dyn Repositories;

    /// Opens a transaction
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;

    /// Cheap connectivity probe for health checks
    async fn ping(&self) -> StoreResult<()>;
}
