/// In-memory store backend
///
/// Backs unit and end-to-end tests with the same `Store` contract as the
/// Postgres backend, without external infrastructure.
///
/// # Locking model
///
/// Two layers: a transaction gate (`tokio::sync::Mutex`) serializing
/// transactions against everything else, and a data lock
/// (`std::sync::Mutex`) held only for the duration of a single synchronous
/// operation. A transaction holds the gate for its whole scope and keeps a
/// snapshot of the state taken at `begin`; commit discards the snapshot,
/// rollback (explicit or by drop) restores it. Transactions are therefore
/// serializable by construction, which is stronger than the Postgres
/// backend needs but exactly what the two-row invariants want.

use super::pagination::{
    assemble_cursor_page, CursorPage, CursorQuery, Pagination, SortField, SortOrder,
};
use super::{
    ExecutionRepository, PendingExecution, Repositories, Store, StoreError, StoreResult,
    StoreTransaction, TaskRepository, UserRepository,
};
use crate::models::{
    ExecutionStatus, NewExecution, NewTask, NewUser, Task, TaskExecution, TaskStatus, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// The whole dataset
#[derive(Debug, Default, Clone)]
struct MemState {
    users: HashMap<Uuid, User>,
    tasks: HashMap<Uuid, Task>,
    executions: HashMap<Uuid, TaskExecution>,
}

struct MemoryInner {
    gate: Arc<AsyncMutex<()>>,
    state: StdMutex<MemState>,
}

impl MemoryInner {
    fn state(&self) -> MutexGuard<'_, MemState> {
        // A poisoned lock only means another test thread panicked mid-write;
        // the data itself is still structurally valid.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// In-memory store
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
    repos: MemoryRepos,
}

impl MemoryStore {
    pub fn new() -> Self {
        let inner = Arc::new(MemoryInner {
            gate: Arc::new(AsyncMutex::new(())),
            state: StdMutex::new(MemState::default()),
        });
        let repos = MemoryRepos {
            inner: inner.clone(),
        };
        MemoryStore { inner, repos }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn repos(&self) -> &dyn Repositories {
        &self.repos
    }

    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let gate = self.inner.gate.clone().lock_owned().await;
        let snapshot = self.inner.state().clone();
        Ok(Box::new(MemoryTransaction {
            repos: MemoryTxRepos {
                inner: self.inner.clone(),
            },
            inner: self.inner.clone(),
            snapshot: Some(snapshot),
            _gate: gate,
        }))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Auto-committing repositories: take the gate briefly per operation so
/// they cannot interleave with an open transaction
struct MemoryRepos {
    inner: Arc<MemoryInner>,
}

/// Transaction-bound repositories: the transaction already owns the gate
struct MemoryTxRepos {
    inner: Arc<MemoryInner>,
}

struct MemoryTransaction {
    repos: MemoryTxRepos,
    inner: Arc<MemoryInner>,
    /// `Some` while the transaction can still roll back
    snapshot: Option<MemState>,
    _gate: OwnedMutexGuard<()>,
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.inner.state() = snapshot;
        }
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    fn repos(&self) -> &dyn Repositories {
        &self.repos
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut this = self;
        this.snapshot = None;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        // Drop restores the snapshot
        Ok(())
    }
}

impl Repositories for MemoryRepos {
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

impl Repositories for MemoryTxRepos {
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

macro_rules! gated {
    ($self:expr, $state:ident => $body:expr) => {{
        let _gate = $self.inner.gate.lock().await;
        let mut $state = $self.inner.state();
        #[allow(unused_mut)]
        let $state = &mut *$state;
        $body
    }};
}

macro_rules! ungated {
    ($self:expr, $state:ident => $body:expr) => {{
        let mut $state = $self.inner.state();
        #[allow(unused_mut)]
        let $state = &mut *$state;
        $body
    }};
}

#[async_trait]
impl UserRepository for MemoryRepos {
    async fn create(&self, user: NewUser) -> StoreResult<User> {
        gated!(self, state => ops::create_user(state, user))
    }
    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        gated!(self, state => Ok(state.users.get(&id).cloned()))
    }
    async fn get_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        gated!(self, state => Ok(ops::user_by_email(state, email)))
    }
    async fn update(&self, user: &User) -> StoreResult<()> {
        gated!(self, state => ops::update_user(state, user))
    }
}

#[async_trait]
impl UserRepository for MemoryTxRepos {
    async fn create(&self, user: NewUser) -> StoreResult<User> {
        ungated!(self, state => ops::create_user(state, user))
    }
    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        ungated!(self, state => Ok(state.users.get(&id).cloned()))
    }
    async fn get_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        ungated!(self, state => Ok(ops::user_by_email(state, email)))
    }
    async fn update(&self, user: &User) -> StoreResult<()> {
        ungated!(self, state => ops::update_user(state, user))
    }
}

#[async_trait]
impl TaskRepository for MemoryRepos {
    async fn create(&self, task: NewTask) -> StoreResult<Task> {
        gated!(self, state => Ok(ops::create_task(state, task)))
    }
    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<Task>> {
        gated!(self, state => Ok(state.tasks.get(&id).cloned()))
    }
    async fn update(&self, task: &Task) -> StoreResult<()> {
        gated!(self, state => ops::update_task(state, task))
    }
    async fn update_status(
        &self,
        id: Uuid,
        from: Option<TaskStatus>,
        to: TaskStatus,
    ) -> StoreResult<bool> {
        gated!(self, state => Ok(ops::update_task_status(state, id, from, to)))
    }
    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        gated!(self, state => Ok(ops::delete_task(state, id)))
    }
    async fn list_by_user(&self, user_id: Uuid, page: &Pagination) -> StoreResult<Vec<Task>> {
        gated!(self, state => Ok(ops::list_tasks_offset(state, user_id, page)))
    }
    async fn list_by_user_cursor(
        &self,
        user_id: Uuid,
        query: &CursorQuery,
    ) -> StoreResult<CursorPage<Task>> {
        gated!(self, state => ops::list_tasks_cursor(state, user_id, query))
    }
    async fn list_by_status(
        &self,
        status: TaskStatus,
        page: &Pagination,
    ) -> StoreResult<Vec<Task>> {
        gated!(self, state => Ok(ops::list_tasks_by_status(state, status, page)))
    }
    async fn count_by_user(&self, user_id: Uuid) -> StoreResult<i64> {
        gated!(self, state => Ok(state.tasks.values().filter(|t| t.user_id == user_id).count() as i64))
    }
    async fn count_by_status(&self, user_id: Uuid, status: TaskStatus) -> StoreResult<i64> {
        gated!(self, state => Ok(state
            .tasks
            .values()
            .filter(|t| t.user_id == user_id && t.status == status)
            .count() as i64))
    }
}

#[async_trait]
impl TaskRepository for MemoryTxRepos {
    async fn create(&self, task: NewTask) -> StoreResult<Task> {
        ungated!(self, state => Ok(ops::create_task(state, task)))
    }
    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<Task>> {
        ungated!(self, state => Ok(state.tasks.get(&id).cloned()))
    }
    async fn update(&self, task: &Task) -> StoreResult<()> {
        ungated!(self, state => ops::update_task(state, task))
    }
    async fn update_status(
        &self,
        id: Uuid,
        from: Option<TaskStatus>,
        to: TaskStatus,
    ) -> StoreResult<bool> {
        ungated!(self, state => Ok(ops::update_task_status(state, id, from, to)))
    }
    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        ungated!(self, state => Ok(ops::delete_task(state, id)))
    }
    async fn list_by_user(&self, user_id: Uuid, page: &Pagination) -> StoreResult<Vec<Task>> {
        ungated!(self, state => Ok(ops::list_tasks_offset(state, user_id, page)))
    }
    async fn list_by_user_cursor(
        &self,
        user_id: Uuid,
        query: &CursorQuery,
    ) -> StoreResult<CursorPage<Task>> {
        ungated!(self, state => ops::list_tasks_cursor(state, user_id, query))
    }
    async fn list_by_status(
        &self,
        status: TaskStatus,
        page: &Pagination,
    ) -> StoreResult<Vec<Task>> {
        ungated!(self, state => Ok(ops::list_tasks_by_status(state, status, page)))
    }
    async fn count_by_user(&self, user_id: Uuid) -> StoreResult<i64> {
        ungated!(self, state => Ok(state.tasks.values().filter(|t| t.user_id == user_id).count() as i64))
    }
    async fn count_by_status(&self, user_id: Uuid, status: TaskStatus) -> StoreResult<i64> {
        ungated!(self, state => Ok(state
            .tasks
            .values()
            .filter(|t| t.user_id == user_id && t.status == status)
            .count() as i64))
    }
}

#[async_trait]
impl ExecutionRepository for MemoryRepos {
    async fn create(&self, execution: NewExecution) -> StoreResult<TaskExecution> {
        gated!(self, state => ops::create_execution(state, execution))
    }
    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<TaskExecution>> {
        gated!(self, state => Ok(state.executions.get(&id).cloned()))
    }
    async fn update(&self, execution: &TaskExecution) -> StoreResult<()> {
        gated!(self, state => ops::update_execution(state, execution))
    }
    async fn update_status(
        &self,
        id: Uuid,
        from: Option<ExecutionStatus>,
        to: ExecutionStatus,
    ) -> StoreResult<bool> {
        gated!(self, state => Ok(ops::update_execution_status(state, id, from, to)))
    }
    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        gated!(self, state => Ok(state.executions.remove(&id).is_some()))
    }
    async fn list_by_task(
        &self,
        task_id: Uuid,
        page: &Pagination,
    ) -> StoreResult<Vec<TaskExecution>> {
        gated!(self, state => Ok(ops::list_executions_offset(state, task_id, page)))
    }
    async fn list_by_task_cursor(
        &self,
        task_id: Uuid,
        query: &CursorQuery,
    ) -> StoreResult<CursorPage<TaskExecution>> {
        gated!(self, state => ops::list_executions_cursor(state, task_id, query))
    }
    async fn list_pending(&self, limit: i64) -> StoreResult<Vec<PendingExecution>> {
        gated!(self, state => Ok(ops::list_pending(state, limit)))
    }
    async fn list_running(&self) -> StoreResult<Vec<TaskExecution>> {
        gated!(self, state => Ok(state
            .executions
            .values()
            .filter(|e| e.status == ExecutionStatus::Running)
            .cloned()
            .collect()))
    }
    async fn try_claim(&self, id: Uuid) -> StoreResult<bool> {
        gated!(self, state => Ok(ops::try_claim(state, id)))
    }
    async fn count_by_task(&self, task_id: Uuid) -> StoreResult<i64> {
        gated!(self, state => Ok(state
            .executions
            .values()
            .filter(|e| e.task_id == task_id)
            .count() as i64))
    }
}

#[async_trait]
impl ExecutionRepository for MemoryTxRepos {
    async fn create(&self, execution: NewExecution) -> StoreResult<TaskExecution> {
        ungated!(self, state => ops::create_execution(state, execution))
    }
    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<TaskExecution>> {
        ungated!(self, state => Ok(state.executions.get(&id).cloned()))
    }
    async fn update(&self, execution: &TaskExecution) -> StoreResult<()> {
        ungated!(self, state => ops::update_execution(state, execution))
    }
    async fn update_status(
        &self,
        id: Uuid,
        from: Option<ExecutionStatus>,
        to: ExecutionStatus,
    ) -> StoreResult<bool> {
        ungated!(self, state => Ok(ops::update_execution_status(state, id, from, to)))
    }
    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        ungated!(self, state => Ok(state.executions.remove(&id).is_some()))
    }
    async fn list_by_task(
        &self,
        task_id: Uuid,
        page: &Pagination,
    ) -> StoreResult<Vec<TaskExecution>> {
        ungated!(self, state => Ok(ops::list_executions_offset(state, task_id, page)))
    }
    async fn list_by_task_cursor(
        &self,
        task_id: Uuid,
        query: &CursorQuery,
    ) -> StoreResult<CursorPage<TaskExecution>> {
        ungated!(self, state => ops::list_executions_cursor(state, task_id, query))
    }
    async fn list_pending(&self, limit: i64) -> StoreResult<Vec<PendingExecution>> {
        ungated!(self, state => Ok(ops::list_pending(state, limit)))
    }
    async fn list_running(&self) -> StoreResult<Vec<TaskExecution>> {
        ungated!(self, state => Ok(state
            .executions
            .values()
            .filter(|e| e.status == ExecutionStatus::Running)
            .cloned()
            .collect()))
    }
    async fn try_claim(&self, id: Uuid) -> StoreResult<bool> {
        ungated!(self, state => Ok(ops::try_claim(state, id)))
    }
    async fn count_by_task(&self, task_id: Uuid) -> StoreResult<i64> {
        ungated!(self, state => Ok(state
            .executions
            .values()
            .filter(|e| e.task_id == task_id)
            .count() as i64))
    }
}

/// The actual data operations, written once against `MemState`
mod ops {
    use super::*;

    pub fn create_user(state: &mut MemState, new: NewUser) -> StoreResult<User> {
        let email = new.normalized_email();
        if state.users.values().any(|u| u.email == email) {
            return Err(StoreError::DuplicateEmail);
        }
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email,
            name: new.name,
            password_hash: new.password_hash,
            created_at: now,
            updated_at: now,
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    pub fn user_by_email(state: &MemState, email: &str) -> Option<User> {
        let email = email.trim().to_lowercase();
        state.users.values().find(|u| u.email == email).cloned()
    }

    pub fn update_user(state: &mut MemState, user: &User) -> StoreResult<()> {
        let stored = state
            .users
            .get_mut(&user.id)
            .ok_or(StoreError::UserNotFound)?;
        stored.name = user.name.clone();
        stored.password_hash = user.password_hash.clone();
        stored.updated_at = Utc::now();
        Ok(())
    }

    pub fn create_task(state: &mut MemState, new: NewTask) -> Task {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            name: new.name,
            description: new.description,
            script_content: new.script_content,
            script_type: new.script_type,
            status: TaskStatus::Pending,
            priority: new.priority,
            timeout_seconds: new.timeout_seconds,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
        };
        state.tasks.insert(task.id, task.clone());
        task
    }

    pub fn update_task(state: &mut MemState, task: &Task) -> StoreResult<()> {
        let stored = state
            .tasks
            .get_mut(&task.id)
            .ok_or(StoreError::TaskNotFound)?;
        stored.name = task.name.clone();
        stored.description = task.description.clone();
        stored.script_content = task.script_content.clone();
        stored.script_type = task.script_type;
        stored.priority = task.priority;
        stored.timeout_seconds = task.timeout_seconds;
        stored.metadata = task.metadata.clone();
        stored.updated_at = Utc::now();
        Ok(())
    }

    pub fn update_task_status(
        state: &mut MemState,
        id: Uuid,
        from: Option<TaskStatus>,
        to: TaskStatus,
    ) -> bool {
        match state.tasks.get_mut(&id) {
            Some(task) if from.is_none() || from == Some(task.status) => {
                task.status = to;
                task.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    pub fn delete_task(state: &mut MemState, id: Uuid) -> bool {
        let existed = state.tasks.remove(&id).is_some();
        if existed {
            state.executions.retain(|_, e| e.task_id != id);
        }
        existed
    }

    pub fn list_tasks_offset(state: &MemState, user_id: Uuid, page: &Pagination) -> Vec<Task> {
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        tasks
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect()
    }

    pub fn list_tasks_by_status(
        state: &MemState,
        status: TaskStatus,
        page: &Pagination,
    ) -> Vec<Task> {
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        tasks
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect()
    }

    enum TypedValue {
        Time(DateTime<Utc>),
        Int(i32),
        Text(String),
    }

    fn parse_cursor_value(field: SortField, value: &str) -> StoreResult<TypedValue> {
        match field {
            SortField::CreatedAt | SortField::UpdatedAt => {
                let ts = DateTime::parse_from_rfc3339(value)
                    .map_err(|e| StoreError::Invalid(format!("bad cursor timestamp: {}", e)))?;
                Ok(TypedValue::Time(ts.with_timezone(&Utc)))
            }
            SortField::Priority => {
                let n = value
                    .parse::<i32>()
                    .map_err(|e| StoreError::Invalid(format!("bad cursor priority: {}", e)))?;
                Ok(TypedValue::Int(n))
            }
            SortField::Name => Ok(TypedValue::Text(value.to_string())),
        }
    }

    fn task_field_cmp(a: &Task, b: &Task, field: SortField) -> Ordering {
        match field {
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            SortField::Priority => a.priority.cmp(&b.priority),
            SortField::Name => a.name.cmp(&b.name),
        }
        .then(a.id.cmp(&b.id))
    }

    fn task_cursor_cmp(task: &Task, field: SortField, value: &TypedValue, id: Uuid) -> Ordering {
        let ord = match (field, value) {
            (SortField::CreatedAt, TypedValue::Time(ts)) => task.created_at.cmp(ts),
            (SortField::UpdatedAt, TypedValue::Time(ts)) => task.updated_at.cmp(ts),
            (SortField::Priority, TypedValue::Int(n)) => task.priority.cmp(n),
            (SortField::Name, TypedValue::Text(s)) => task.name.as_str().cmp(s.as_str()),
            // parse_cursor_value always produces the matching variant
            _ => Ordering::Equal,
        };
        ord.then(task.id.cmp(&id))
    }

    pub fn task_sort_value(task: &Task, field: SortField) -> String {
        match field {
            SortField::CreatedAt => task.created_at.to_rfc3339(),
            SortField::UpdatedAt => task.updated_at.to_rfc3339(),
            SortField::Priority => task.priority.to_string(),
            SortField::Name => task.name.clone(),
        }
    }

    pub fn list_tasks_cursor(
        state: &MemState,
        user_id: Uuid,
        query: &CursorQuery,
    ) -> StoreResult<CursorPage<Task>> {
        let field = query.sort_field;
        let traversal = query.traversal_order();

        let mut rows: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            let ord = task_field_cmp(a, b, field);
            match traversal {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });

        if let Some(cursor) = &query.cursor {
            let value = parse_cursor_value(field, &cursor.value)?;
            rows.retain(|t| {
                let ord = task_cursor_cmp(t, field, &value, cursor.id);
                match traversal {
                    SortOrder::Asc => ord == Ordering::Greater,
                    SortOrder::Desc => ord == Ordering::Less,
                }
            });
        }

        let has_more = rows.len() as i64 > query.limit;
        rows.truncate(query.limit as usize);
        if query.walks_prev() {
            rows.reverse();
        }

        Ok(assemble_cursor_page(
            rows,
            query,
            has_more,
            |t| task_sort_value(t, field),
            |t| t.id,
        ))
    }

    pub fn create_execution(
        state: &mut MemState,
        new: NewExecution,
    ) -> StoreResult<TaskExecution> {
        if !state.tasks.contains_key(&new.task_id) {
            return Err(StoreError::TaskNotFound);
        }
        let now = Utc::now();
        let execution = TaskExecution {
            id: Uuid::new_v4(),
            task_id: new.task_id,
            status: ExecutionStatus::Pending,
            return_code: None,
            stdout: None,
            stderr: None,
            execution_time_ms: None,
            memory_usage_bytes: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        state.executions.insert(execution.id, execution.clone());
        Ok(execution)
    }

    pub fn update_execution(state: &mut MemState, execution: &TaskExecution) -> StoreResult<()> {
        let stored = state
            .executions
            .get_mut(&execution.id)
            .ok_or(StoreError::ExecutionNotFound)?;
        stored.status = execution.status;
        stored.return_code = execution.return_code;
        stored.stdout = execution.stdout.clone();
        stored.stderr = execution.stderr.clone();
        stored.execution_time_ms = execution.execution_time_ms;
        stored.memory_usage_bytes = execution.memory_usage_bytes;
        stored.started_at = execution.started_at;
        stored.completed_at = execution.completed_at;
        stored.updated_at = Utc::now();
        Ok(())
    }

    pub fn update_execution_status(
        state: &mut MemState,
        id: Uuid,
        from: Option<ExecutionStatus>,
        to: ExecutionStatus,
    ) -> bool {
        match state.executions.get_mut(&id) {
            Some(execution) if from.is_none() || from == Some(execution.status) => {
                let now = Utc::now();
                execution.status = to;
                execution.updated_at = now;
                match to {
                    ExecutionStatus::Running => execution.started_at = Some(now),
                    ExecutionStatus::Pending => execution.started_at = None,
                    _ if to.is_terminal() && execution.completed_at.is_none() => {
                        execution.completed_at = Some(now)
                    }
                    _ => {}
                }
                true
            }
            _ => false,
        }
    }

    pub fn list_executions_offset(
        state: &MemState,
        task_id: Uuid,
        page: &Pagination,
    ) -> Vec<TaskExecution> {
        let mut executions: Vec<TaskExecution> = state
            .executions
            .values()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect();
        executions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        executions
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect()
    }

    fn execution_field_cmp(a: &TaskExecution, b: &TaskExecution, field: SortField) -> Ordering {
        match field {
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            // Unsupported fields are rejected before sorting
            SortField::Priority | SortField::Name => Ordering::Equal,
        }
        .then(a.id.cmp(&b.id))
    }

    pub fn execution_sort_value(execution: &TaskExecution, field: SortField) -> String {
        match field {
            SortField::UpdatedAt => execution.updated_at.to_rfc3339(),
            _ => execution.created_at.to_rfc3339(),
        }
    }

    pub fn list_executions_cursor(
        state: &MemState,
        task_id: Uuid,
        query: &CursorQuery,
    ) -> StoreResult<CursorPage<TaskExecution>> {
        let field = query.sort_field;
        if !matches!(field, SortField::CreatedAt | SortField::UpdatedAt) {
            return Err(StoreError::Invalid(format!(
                "executions cannot be sorted by {}",
                field
            )));
        }
        let traversal = query.traversal_order();

        let mut rows: Vec<TaskExecution> = state
            .executions
            .values()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            let ord = execution_field_cmp(a, b, field);
            match traversal {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });

        if let Some(cursor) = &query.cursor {
            let ts = DateTime::parse_from_rfc3339(&cursor.value)
                .map_err(|e| StoreError::Invalid(format!("bad cursor timestamp: {}", e)))?
                .with_timezone(&Utc);
            rows.retain(|e| {
                let value = match field {
                    SortField::UpdatedAt => e.updated_at,
                    _ => e.created_at,
                };
                let ord = value.cmp(&ts).then(e.id.cmp(&cursor.id));
                match traversal {
                    SortOrder::Asc => ord == Ordering::Greater,
                    SortOrder::Desc => ord == Ordering::Less,
                }
            });
        }

        let has_more = rows.len() as i64 > query.limit;
        rows.truncate(query.limit as usize);
        if query.walks_prev() {
            rows.reverse();
        }

        Ok(assemble_cursor_page(
            rows,
            query,
            has_more,
            |e| execution_sort_value(e, field),
            |e| e.id,
        ))
    }

    pub fn list_pending(state: &MemState, limit: i64) -> Vec<PendingExecution> {
        let mut pending: Vec<PendingExecution> = state
            .executions
            .values()
            .filter(|e| e.status == ExecutionStatus::Pending)
            .filter_map(|e| {
                state.tasks.get(&e.task_id).map(|t| PendingExecution {
                    execution: e.clone(),
                    user_id: t.user_id,
                    priority: t.priority,
                    script_content: t.script_content.clone(),
                    script_type: t.script_type,
                    timeout_seconds: t.timeout_seconds,
                })
            })
            .collect();
        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.execution.created_at.cmp(&b.execution.created_at))
        });
        pending.truncate(limit.max(0) as usize);
        pending
    }

    pub fn try_claim(state: &mut MemState, id: Uuid) -> bool {
        update_execution_status(
            state,
            id,
            Some(ExecutionStatus::Pending),
            ExecutionStatus::Running,
        )
    }
}
