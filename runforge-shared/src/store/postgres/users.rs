//! User queries

use crate::models::{NewUser, User};
use crate::store::{StoreError, StoreResult};
use sqlx::PgExecutor;
use uuid::Uuid;

const COLUMNS: &str = "id, email, name, password_hash, created_at, updated_at";

pub(super) async fn insert<'e>(ex: impl PgExecutor<'e>, user: &NewUser) -> StoreResult<User> {
    let sql = format!(
        "INSERT INTO users (email, name, password_hash) VALUES ($1, $2, $3) RETURNING {}",
        COLUMNS
    );
    sqlx::query_as::<_, User>(&sql)
        .bind(user.normalized_email())
        .bind(&user.name)
        .bind(&user.password_hash)
        .fetch_one(ex)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.constraint().is_some_and(|c| c.contains("email")) => {
                StoreError::DuplicateEmail
            }
            _ => StoreError::Database(e),
        })
}

pub(super) async fn by_id<'e>(ex: impl PgExecutor<'e>, id: Uuid) -> StoreResult<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE id = $1", COLUMNS);
    Ok(sqlx::query_as::<_, User>(&sql)
        .bind(id)
        .fetch_optional(ex)
        .await?)
}

pub(super) async fn by_email<'e>(
    ex: impl PgExecutor<'e>,
    email: &str,
) -> StoreResult<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE email = $1", COLUMNS);
    Ok(sqlx::query_as::<_, User>(&sql)
        .bind(email.trim().to_lowercase())
        .fetch_optional(ex)
        .await?)
}

pub(super) async fn update<'e>(ex: impl PgExecutor<'e>, user: &User) -> StoreResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE users
        SET name = $2, password_hash = $3, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(user.id)
    .bind(&user.name)
    .bind(&user.password_hash)
    .execute(ex)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::UserNotFound);
    }
    Ok(())
}
