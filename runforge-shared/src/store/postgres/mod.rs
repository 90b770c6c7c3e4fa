/// PostgreSQL store backend
///
/// Production implementation of the `Store` contract on top of sqlx. Query
/// functions live in the sibling modules and are generic over
/// `PgExecutor`, so the pool-backed repositories and the transaction-bound
/// repositories share the same SQL.
///
/// # Transactions
///
/// `begin` opens a `sqlx::Transaction` and parks it behind an async mutex so
/// the `&self` repository methods can execute against it. Dropping the
/// transaction object without committing lets sqlx roll it back.

mod executions;
mod tasks;
mod users;

use super::pagination::{CursorPage, CursorQuery, Pagination};
use super::{
    ExecutionRepository, PendingExecution, Repositories, Store, StoreError, StoreResult,
    StoreTransaction, TaskRepository, UserRepository,
};
use crate::models::{
    ExecutionStatus, NewExecution, NewTask, NewUser, Task, TaskExecution, TaskStatus, User,
};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

type SharedTx = Arc<AsyncMutex<Transaction<'static, Postgres>>>;

/// A connection source: the pool for auto-commit, or an open transaction
#[derive(Clone)]
enum PgConn {
    Pool(PgPool),
    Tx(SharedTx),
}

/// Runs a query body against whichever connection this repository is bound
/// to. The body must be an expression using `$ex` as a `PgExecutor`.
macro_rules! with_conn {
    ($self:expr, $ex:ident => $body:expr) => {
        match &$self.conn {
            PgConn::Pool(pool) => {
                let $ex = pool;
                $body
            }
            PgConn::Tx(tx) => {
                let mut guard = tx.lock().await;
                let $ex = &mut **guard;
                $body
            }
        }
    };
}

/// Repository bundle bound to a pool or a transaction
struct PgRepos {
    conn: PgConn,
}

impl Repositories for PgRepos {
    fn users(&self) -> &dyn UserRepository {
        self
    }
    fn tasks(&self) -> &dyn TaskRepository {
        self
    }
    fn executions(&self) -> &dyn ExecutionRepository {
        self
    }
}

/// PostgreSQL store
pub struct PgStore {
    pool: PgPool,
    repos: PgRepos,
}

impl PgStore {
    /// Wraps an existing connection pool
    pub fn new(pool: PgPool) -> Self {
        let repos = PgRepos {
            conn: PgConn::Pool(pool.clone()),
        };
        PgStore { pool, repos }
    }
}

#[async_trait]
impl Store for PgStore {
    fn repos(&self) -> &dyn Repositories {
        &self.repos
    }

    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let tx: SharedTx = Arc::new(AsyncMutex::new(self.pool.begin().await?));
        Ok(Box::new(PgStoreTransaction {
            repos: PgRepos {
                conn: PgConn::Tx(tx.clone()),
            },
            tx,
        }))
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

struct PgStoreTransaction {
    repos: PgRepos,
    tx: SharedTx,
}

impl PgStoreTransaction {
    /// Reclaims exclusive ownership of the inner transaction
    fn into_tx(self: Box<Self>) -> StoreResult<Transaction<'static, Postgres>> {
        let this = *self;
        drop(this.repos);
        let mutex = Arc::try_unwrap(this.tx)
            .map_err(|_| StoreError::Transaction("transaction handle still in use".to_string()))?;
        Ok(mutex.into_inner())
    }
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    fn repos(&self) -> &dyn Repositories {
        &self.repos
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.into_tx()?.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.into_tx()?.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl UserRepository for PgRepos {
    async fn create(&self, user: NewUser) -> StoreResult<User> {
        with_conn!(self, ex => users::insert(ex, &user).await)
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        with_conn!(self, ex => users::by_id(ex, id).await)
    }

    async fn get_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        with_conn!(self, ex => users::by_email(ex, email).await)
    }

    async fn update(&self, user: &User) -> StoreResult<()> {
        with_conn!(self, ex => users::update(ex, user).await)
    }
}

#[async_trait]
impl TaskRepository for PgRepos {
    async fn create(&self, task: NewTask) -> StoreResult<Task> {
        with_conn!(self, ex => tasks::insert(ex, &task).await)
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<Task>> {
        with_conn!(self, ex => tasks::by_id(ex, id).await)
    }

    async fn update(&self, task: &Task) -> StoreResult<()> {
        with_conn!(self, ex => tasks::update(ex, task).await)
    }

    async fn update_status(
        &self,
        id: Uuid,
        from: Option<TaskStatus>,
        to: TaskStatus,
    ) -> StoreResult<bool> {
        with_conn!(self, ex => tasks::update_status(ex, id, from, to).await)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        with_conn!(self, ex => tasks::delete(ex, id).await)
    }

    async fn list_by_user(&self, user_id: Uuid, page: &Pagination) -> StoreResult<Vec<Task>> {
        with_conn!(self, ex => tasks::list_by_user(ex, user_id, page).await)
    }

    async fn list_by_user_cursor(
        &self,
        user_id: Uuid,
        query: &CursorQuery,
    ) -> StoreResult<CursorPage<Task>> {
        with_conn!(self, ex => tasks::list_by_user_cursor(ex, user_id, query).await)
    }

    async fn list_by_status(
        &self,
        status: TaskStatus,
        page: &Pagination,
    ) -> StoreResult<Vec<Task>> {
        with_conn!(self, ex => tasks::list_by_status(ex, status, page).await)
    }

    async fn count_by_user(&self, user_id: Uuid) -> StoreResult<i64> {
        with_conn!(self, ex => tasks::count_by_user(ex, user_id).await)
    }

    async fn count_by_status(&self, user_id: Uuid, status: TaskStatus) -> StoreResult<i64> {
        with_conn!(self, ex => tasks::count_by_status(ex, user_id, status).await)
    }
}

#[async_trait]
impl ExecutionRepository for PgRepos {
    async fn create(&self, execution: NewExecution) -> StoreResult<TaskExecution> {
        with_conn!(self, ex => executions::insert(ex, &execution).await)
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<TaskExecution>> {
        with_conn!(self, ex => executions::by_id(ex, id).await)
    }

    async fn update(&self, execution: &TaskExecution) -> StoreResult<()> {
        with_conn!(self, ex => executions::update(ex, execution).await)
    }

    async fn update_status(
        &self,
        id: Uuid,
        from: Option<ExecutionStatus>,
        to: ExecutionStatus,
    ) -> StoreResult<bool> {
        with_conn!(self, ex => executions::update_status(ex, id, from, to).await)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        with_conn!(self, ex => executions::delete(ex, id).await)
    }

    async fn list_by_task(
        &self,
        task_id: Uuid,
        page: &Pagination,
    ) -> StoreResult<Vec<TaskExecution>> {
        with_conn!(self, ex => executions::list_by_task(ex, task_id, page).await)
    }

    async fn list_by_task_cursor(
        &self,
        task_id: Uuid,
        query: &CursorQuery,
    ) -> StoreResult<CursorPage<TaskExecution>> {
        with_conn!(self, ex => executions::list_by_task_cursor(ex, task_id, query).await)
    }

    async fn list_pending(&self, limit: i64) -> StoreResult<Vec<PendingExecution>> {
        with_conn!(self, ex => executions::list_pending(ex, limit).await)
    }

    async fn list_running(&self) -> StoreResult<Vec<TaskExecution>> {
        with_conn!(self, ex => executions::list_running(ex).await)
    }

    async fn try_claim(&self, id: Uuid) -> StoreResult<bool> {
        with_conn!(self, ex => executions::try_claim(ex, id).await)
    }

    async fn count_by_task(&self, task_id: Uuid) -> StoreResult<i64> {
        with_conn!(self, ex => executions::count_by_task(ex, task_id).await)
    }
}
