/// User model
///
/// Users are the identity principals of the system. Every task is owned by
/// exactly one user, and the API only ever operates on resources owned by
/// the authenticated user.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE users (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     email VARCHAR(255) NOT NULL UNIQUE,
///     name VARCHAR(255) NOT NULL,
///     password_hash TEXT NOT NULL,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
///
/// Emails are stored lowercased; uniqueness is case-insensitive by
/// construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User model
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    /// Unique user ID
    pub id: Uuid,

    /// Email address (lowercased, unique)
    pub email: String,

    /// Display name
    pub name: String,

    /// Argon2id password hash (never serialized to API responses)
    #[serde(skip_serializing)]
    pub password_hash: String,

    /// When the user was created
    pub created_at: DateTime<Utc>,

    /// When the user was last updated
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a new user
#[derive(Debug, Clone)]
pub struct NewUser {
    /// Email address (will be lowercased before storage)
    pub email: String,

    /// Display name
    pub name: String,

    /// Argon2id password hash
    pub password_hash: String,
}

impl NewUser {
    /// Normalizes the email for case-insensitive uniqueness
    pub fn normalized_email(&self) -> String {
        self.email.trim().to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_email() {
        let user = NewUser {
            email: "  Alice@Example.COM ".to_string(),
            name: "Alice".to_string(),
            password_hash: "$argon2id$...".to_string(),
        };
        assert_eq!(user.normalized_email(), "alice@example.com");
    }
}
