//! Task queries
//!
//! Cursor listings use keyset predicates over `(sort_column, id)`; the sort
//! column always comes from the `SortField` whitelist, never from request
//! input, so the `format!` interpolation cannot inject.

use crate::models::{NewTask, Task, TaskStatus};
use crate::store::pagination::{
    assemble_cursor_page, CursorPage, CursorQuery, Pagination, SortField, SortOrder,
};
use crate::store::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use uuid::Uuid;

const COLUMNS: &str = "id, user_id, name, description, script_content, script_type, status, \
                       priority, timeout_seconds, metadata, created_at, updated_at";

pub(super) async fn insert<'e>(ex: impl PgExecutor<'e>, task: &NewTask) -> StoreResult<Task> {
    let sql = format!(
        r#"
        INSERT INTO tasks (user_id, name, description, script_content, script_type, priority, timeout_seconds, metadata)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {}
        "#,
        COLUMNS
    );
    Ok(sqlx::query_as::<_, Task>(&sql)
        .bind(task.user_id)
        .bind(&task.name)
        .bind(&task.description)
        .bind(&task.script_content)
        .bind(task.script_type)
        .bind(task.priority)
        .bind(task.timeout_seconds)
        .bind(&task.metadata)
        .fetch_one(ex)
        .await?)
}

pub(super) async fn by_id<'e>(ex: impl PgExecutor<'e>, id: Uuid) -> StoreResult<Option<Task>> {
    let sql = format!("SELECT {} FROM tasks WHERE id = $1", COLUMNS);
    Ok(sqlx::query_as::<_, Task>(&sql)
        .bind(id)
        .fetch_optional(ex)
        .await?)
}

pub(super) async fn update<'e>(ex: impl PgExecutor<'e>, task: &Task) -> StoreResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE tasks
        SET name = $2,
            description = $3,
            script_content = $4,
            script_type = $5,
            priority = $6,
            timeout_seconds = $7,
            metadata = $8,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(task.id)
    .bind(&task.name)
    .bind(&task.description)
    .bind(&task.script_content)
    .bind(task.script_type)
    .bind(task.priority)
    .bind(task.timeout_seconds)
    .bind(&task.metadata)
    .execute(ex)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::TaskNotFound);
    }
    Ok(())
}

pub(super) async fn update_status<'e>(
    ex: impl PgExecutor<'e>,
    id: Uuid,
    from: Option<TaskStatus>,
    to: TaskStatus,
) -> StoreResult<bool> {
    let result = match from {
        Some(from) => {
            sqlx::query(
                "UPDATE tasks SET status = $2, updated_at = NOW() WHERE id = $1 AND status = $3",
            )
            .bind(id)
            .bind(to)
            .bind(from)
            .execute(ex)
            .await?
        }
        None => {
            sqlx::query("UPDATE tasks SET status = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(to)
                .execute(ex)
                .await?
        }
    };
    Ok(result.rows_affected() > 0)
}

pub(super) async fn delete<'e>(ex: impl PgExecutor<'e>, id: Uuid) -> StoreResult<bool> {
    let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
        .bind(id)
        .execute(ex)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub(super) async fn list_by_user<'e>(
    ex: impl PgExecutor<'e>,
    user_id: Uuid,
    page: &Pagination,
) -> StoreResult<Vec<Task>> {
    let sql = format!(
        "SELECT {} FROM tasks WHERE user_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
        COLUMNS
    );
    Ok(sqlx::query_as::<_, Task>(&sql)
        .bind(user_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(ex)
        .await?)
}

pub(super) async fn list_by_status<'e>(
    ex: impl PgExecutor<'e>,
    status: TaskStatus,
    page: &Pagination,
) -> StoreResult<Vec<Task>> {
    let sql = format!(
        "SELECT {} FROM tasks WHERE status = $1 ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
        COLUMNS
    );
    Ok(sqlx::query_as::<_, Task>(&sql)
        .bind(status)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(ex)
        .await?)
}

pub(super) async fn count_by_user<'e>(ex: impl PgExecutor<'e>, user_id: Uuid) -> StoreResult<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tasks WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(ex)
        .await?;
    Ok(count)
}

pub(super) async fn count_by_status<'e>(
    ex: impl PgExecutor<'e>,
    user_id: Uuid,
    status: TaskStatus,
) -> StoreResult<i64> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM tasks WHERE user_id = $1 AND status = $2")
            .bind(user_id)
            .bind(status)
            .fetch_one(ex)
            .await?;
    Ok(count)
}

pub(super) async fn list_by_user_cursor<'e>(
    ex: impl PgExecutor<'e>,
    user_id: Uuid,
    query: &CursorQuery,
) -> StoreResult<CursorPage<Task>> {
    let col = query.sort_field.as_str();
    let (dir, op) = match query.traversal_order() {
        SortOrder::Asc => ("ASC", ">"),
        SortOrder::Desc => ("DESC", "<"),
    };
    // Fetch one extra row to detect whether more pages exist
    let fetch = query.limit + 1;

    let mut rows: Vec<Task> = match &query.cursor {
        None => {
            let sql = format!(
                "SELECT {} FROM tasks WHERE user_id = $1 ORDER BY {} {}, id {} LIMIT $2",
                COLUMNS, col, dir, dir
            );
            sqlx::query_as::<_, Task>(&sql)
                .bind(user_id)
                .bind(fetch)
                .fetch_all(ex)
                .await?
        }
        Some(cursor) => {
            let sql = format!(
                "SELECT {} FROM tasks WHERE user_id = $1 AND ({}, id) {} ($2, $3) \
                 ORDER BY {} {}, id {} LIMIT $4",
                COLUMNS, col, op, col, dir, dir
            );
            let q = sqlx::query_as::<_, Task>(&sql).bind(user_id);
            let q = match query.sort_field {
                SortField::CreatedAt | SortField::UpdatedAt => {
                    q.bind(parse_cursor_timestamp(&cursor.value)?)
                }
                SortField::Priority => q.bind(cursor.value.parse::<i32>().map_err(|e| {
                    StoreError::Invalid(format!("bad cursor priority: {}", e))
                })?),
                SortField::Name => q.bind(cursor.value.clone()),
            };
            q.bind(cursor.id).bind(fetch).fetch_all(ex).await?
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
        |t| sort_value(t, field),
        |t| t.id,
    ))
}

fn sort_value(task: &Task, field: SortField) -> String {
    match field {
        SortField::CreatedAt => task.created_at.to_rfc3339(),
        SortField::UpdatedAt => task.updated_at.to_rfc3339(),
        SortField::Priority => task.priority.to_string(),
        SortField::Name => task.name.clone(),
    }
}

pub(super) fn parse_cursor_timestamp(value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Invalid(format!("bad cursor timestamp: {}", e)))
}
