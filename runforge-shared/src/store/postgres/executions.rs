//! Execution queries

use crate::models::{ExecutionStatus, NewExecution, ScriptType, TaskExecution};
use crate::store::pagination::{
    assemble_cursor_page, CursorPage, CursorQuery, Pagination, SortField, SortOrder,
};
use crate::store::{PendingExecution, StoreError, StoreResult};
use super::tasks::parse_cursor_timestamp;
use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use uuid::Uuid;

const COLUMNS: &str = "id, task_id, status, return_code, stdout, stderr, execution_time_ms, \
                       memory_usage_bytes, started_at, completed_at, created_at, updated_at";

pub(super) async fn insert<'e>(
    ex: impl PgExecutor<'e>,
    execution: &NewExecution,
) -> StoreResult<TaskExecution> {
    let sql = format!(
        "INSERT INTO task_executions (task_id) VALUES ($1) RETURNING {}",
        COLUMNS
    );
    sqlx::query_as::<_, TaskExecution>(&sql)
        .bind(execution.task_id)
        .fetch_one(ex)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.constraint().is_some_and(|c| c.contains("task_id")) => {
                StoreError::TaskNotFound
            }
            _ => StoreError::Database(e),
        })
}

pub(super) async fn by_id<'e>(
    ex: impl PgExecutor<'e>,
    id: Uuid,
) -> StoreResult<Option<TaskExecution>> {
    let sql = format!("SELECT {} FROM task_executions WHERE id = $1", COLUMNS);
    Ok(sqlx::query_as::<_, TaskExecution>(&sql)
        .bind(id)
        .fetch_optional(ex)
        .await?)
}

pub(super) async fn update<'e>(
    ex: impl PgExecutor<'e>,
    execution: &TaskExecution,
) -> StoreResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE task_executions
        SET status = $2,
            return_code = $3,
            stdout = $4,
            stderr = $5,
            execution_time_ms = $6,
            memory_usage_bytes = $7,
            started_at = $8,
            completed_at = $9,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(execution.id)
    .bind(execution.status)
    .bind(execution.return_code)
    .bind(&execution.stdout)
    .bind(&execution.stderr)
    .bind(execution.execution_time_ms)
    .bind(execution.memory_usage_bytes)
    .bind(execution.started_at)
    .bind(execution.completed_at)
    .execute(ex)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::ExecutionNotFound);
    }
    Ok(())
}

pub(super) async fn update_status<'e>(
    ex: impl PgExecutor<'e>,
    id: Uuid,
    from: Option<ExecutionStatus>,
    to: ExecutionStatus,
) -> StoreResult<bool> {
    // Transition side effects on the timestamps live here so every caller
    // gets them uniformly
    let stamps = match to {
        ExecutionStatus::Running => ", started_at = NOW()",
        ExecutionStatus::Pending => ", started_at = NULL",
        _ if to.is_terminal() => ", completed_at = COALESCE(completed_at, NOW())",
        _ => "",
    };

    let result = match from {
        Some(from) => {
            let sql = format!(
                "UPDATE task_executions SET status = $2, updated_at = NOW(){} \
                 WHERE id = $1 AND status = $3",
                stamps
            );
            sqlx::query(&sql)
                .bind(id)
                .bind(to)
                .bind(from)
                .execute(ex)
                .await?
        }
        None => {
            let sql = format!(
                "UPDATE task_executions SET status = $2, updated_at = NOW(){} WHERE id = $1",
                stamps
            );
            sqlx::query(&sql).bind(id).bind(to).execute(ex).await?
        }
    };
    Ok(result.rows_affected() > 0)
}

pub(super) async fn delete<'e>(ex: impl PgExecutor<'e>, id: Uuid) -> StoreResult<bool> {
    let result = sqlx::query("DELETE FROM task_executions WHERE id = $1")
        .bind(id)
        .execute(ex)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub(super) async fn list_by_task<'e>(
    ex: impl PgExecutor<'e>,
    task_id: Uuid,
    page: &Pagination,
) -> StoreResult<Vec<TaskExecution>> {
    let sql = format!(
        "SELECT {} FROM task_executions WHERE task_id = $1 \
         ORDER BY created_at ASC, id ASC LIMIT $2 OFFSET $3",
        COLUMNS
    );
    Ok(sqlx::query_as::<_, TaskExecution>(&sql)
        .bind(task_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(ex)
        .await?)
}

pub(super) async fn list_by_task_cursor<'e>(
    ex: impl PgExecutor<'e>,
    task_id: Uuid,
    query: &CursorQuery,
) -> StoreResult<CursorPage<TaskExecution>> {
    if !matches!(
        query.sort_field,
        SortField::CreatedAt | SortField::UpdatedAt
    ) {
        return Err(StoreError::Invalid(format!(
            "executions cannot be sorted by {}",
            query.sort_field
        )));
    }

    let col = query.sort_field.as_str();
    let (dir, op) = match query.traversal_order() {
        SortOrder::Asc => ("ASC", ">"),
        SortOrder::Desc => ("DESC", "<"),
    };
    let fetch = query.limit + 1;

    let mut rows: Vec<TaskExecution> = match &query.cursor {
        None => {
            let sql = format!(
                "SELECT {} FROM task_executions WHERE task_id = $1 \
                 ORDER BY {} {}, id {} LIMIT $2",
                COLUMNS, col, dir, dir
            );
            sqlx::query_as::<_, TaskExecution>(&sql)
                .bind(task_id)
                .bind(fetch)
                .fetch_all(ex)
                .await?
        }
        Some(cursor) => {
            let ts = parse_cursor_timestamp(&cursor.value)?;
            let sql = format!(
                "SELECT {} FROM task_executions WHERE task_id = $1 AND ({}, id) {} ($2, $3) \
                 ORDER BY {} {}, id {} LIMIT $4",
                COLUMNS, col, op, col, dir, dir
            );
            sqlx::query_as::<_, TaskExecution>(&sql)
                .bind(task_id)
                .bind(ts)
                .bind(cursor.id)
                .bind(fetch)
                .fetch_all(ex)
                .await?
        }
    };

    let has_more = rows.len() as i64 > query.limit;
    rows.truncate(query.limit as usize);
    if query.walks_prev() {
        rows.reverse();
    }

    let field = query.sort_field;
    Ok(assemble_cursor_page(
        rows,
        query,
        has_more,
        move |e| match field {
            SortField::UpdatedAt => e.updated_at.to_rfc3339(),
            _ => e.created_at.to_rfc3339(),
        },
        |e| e.id,
    ))
}

/// Row shape for the pending-execution join
#[derive(sqlx::FromRow)]
struct PendingRow {
    id: Uuid,
    task_id: Uuid,
    status: ExecutionStatus,
    return_code: Option<i32>,
    stdout: Option<String>,
    stderr: Option<String>,
    execution_time_ms: Option<i64>,
    memory_usage_bytes: Option<i64>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    task_user_id: Uuid,
    task_priority: i32,
    script_content: String,
    script_type: ScriptType,
    task_timeout_seconds: i32,
}

impl From<PendingRow> for PendingExecution {
    fn from(row: PendingRow) -> Self {
        PendingExecution {
            execution: TaskExecution {
                id: row.id,
                task_id: row.task_id,
                status: row.status,
                return_code: row.return_code,
                stdout: row.stdout,
                stderr: row.stderr,
                execution_time_ms: row.execution_time_ms,
                memory_usage_bytes: row.memory_usage_bytes,
                started_at: row.started_at,
                completed_at: row.completed_at,
                created_at: row.created_at,
                updated_at: row.updated_at,
            },
            user_id: row.task_user_id,
            priority: row.task_priority,
            script_content: row.script_content,
            script_type: row.script_type,
            timeout_seconds: row.task_timeout_seconds,
        }
    }
}

pub(super) async fn list_pending<'e>(
    ex: impl PgExecutor<'e>,
    limit: i64,
) -> StoreResult<Vec<PendingExecution>> {
    let rows = sqlx::query_as::<_, PendingRow>(
        r#"
        SELECT e.id, e.task_id, e.status, e.return_code, e.stdout, e.stderr,
               e.execution_time_ms, e.memory_usage_bytes, e.started_at, e.completed_at,
               e.created_at, e.updated_at,
               t.user_id AS task_user_id,
               t.priority AS task_priority,
               t.script_content,
               t.script_type,
               t.timeout_seconds AS task_timeout_seconds
        FROM task_executions e
        JOIN tasks t ON t.id = e.task_id
        WHERE e.status = 'pending'
        ORDER BY t.priority DESC, e.created_at ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(ex)
    .await?;

    Ok(rows.into_iter().map(PendingExecution::from).collect())
}

pub(super) async fn list_running<'e>(ex: impl PgExecutor<'e>) -> StoreResult<Vec<TaskExecution>> {
    let sql = format!(
        "SELECT {} FROM task_executions WHERE status = 'running' ORDER BY started_at ASC",
        COLUMNS
    );
    Ok(sqlx::query_as::<_, TaskExecution>(&sql)
        .fetch_all(ex)
        .await?)
}

pub(super) async fn try_claim<'e>(ex: impl PgExecutor<'e>, id: Uuid) -> StoreResult<bool> {
    // Conditional on the stored status so a concurrent dispatcher loses
    // cleanly instead of double-running the script
    let result = sqlx::query(
        r#"
        UPDATE task_executions
        SET status = 'running', started_at = NOW(), updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        "#,
    )
    .bind(id)
    .execute(ex)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub(super) async fn count_by_task<'e>(ex: impl PgExecutor<'e>, task_id: Uuid) -> StoreResult<i64> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM task_executions WHERE task_id = $1")
            .bind(task_id)
            .fetch_one(ex)
            .await?;
    Ok(count)
}
