/// Task execution model
///
/// A `TaskExecution` records one attempt to run a task: who claimed it, what
/// the script produced, and how it ended. At most one execution per task is
/// in a non-terminal state at any instant; the service layer enforces this
/// inside a transaction.
///
/// # State Machine
///
/// ```text
/// pending --[dispatcher claims]--> running --[executor finishes]--> completed|failed|timeout
/// pending --[user cancel]--------> cancelled
/// running --[user cancel]--------> cancelled
/// ```
///
/// # Schema
///
/// ```sql
/// CREATE TYPE execution_status AS ENUM (
///     'pending', 'running', 'completed', 'failed', 'timeout', 'cancelled'
/// );
///
/// CREATE TABLE task_executions (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     task_id UUID NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
///     status execution_status NOT NULL DEFAULT 'pending',
///     return_code INTEGER,
///     stdout TEXT,
///     stderr TEXT,
///     execution_time_ms BIGINT,
///     memory_usage_bytes BIGINT,
///     started_at TIMESTAMPTZ,
///     completed_at TIMESTAMPTZ,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use super::task::TaskStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Execution lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "execution_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Queued, waiting for a dispatcher to claim it
    Pending,

    /// Claimed by a worker, script is running
    Running,

    /// Script finished (regardless of return code)
    Completed,

    /// Executor error or worker panic
    Failed,

    /// Exceeded the task's timeout
    Timeout,

    /// Cancelled by the user or during shutdown
    Cancelled,
}

impl ExecutionStatus {
    /// Converts status to its wire/database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    /// Checks if the status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed
                | ExecutionStatus::Failed
                | ExecutionStatus::Timeout
                | ExecutionStatus::Cancelled
        )
    }

    /// Maps a terminal execution status to the task status it implies
    ///
    /// Returns `None` for non-terminal statuses; finalizing with one of
    /// those is a caller bug.
    pub fn task_status(&self) -> Option<TaskStatus> {
        match self {
            ExecutionStatus::Completed => Some(TaskStatus::Completed),
            ExecutionStatus::Failed => Some(TaskStatus::Failed),
            ExecutionStatus::Timeout => Some(TaskStatus::Timeout),
            ExecutionStatus::Cancelled => Some(TaskStatus::Cancelled),
            ExecutionStatus::Pending | ExecutionStatus::Running => None,
        }
    }

    /// Checks if transition to `target` is valid
    pub fn can_transition_to(&self, target: ExecutionStatus) -> bool {
        match (self, target) {
            (ExecutionStatus::Pending, ExecutionStatus::Running) => true,
            (ExecutionStatus::Pending, ExecutionStatus::Cancelled) => true,

            (ExecutionStatus::Running, ExecutionStatus::Completed) => true,
            (ExecutionStatus::Running, ExecutionStatus::Failed) => true,
            (ExecutionStatus::Running, ExecutionStatus::Timeout) => true,
            (ExecutionStatus::Running, ExecutionStatus::Cancelled) => true,

            // Orphan reaping after a restart re-queues a running execution
            (ExecutionStatus::Running, ExecutionStatus::Pending) => true,

            _ => false,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "timeout" => Ok(ExecutionStatus::Timeout),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(format!("unknown execution status: {}", other)),
        }
    }
}

/// Task execution model
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskExecution {
    /// Unique execution ID
    pub id: Uuid,

    /// Task this execution belongs to (immutable)
    pub task_id: Uuid,

    /// Current lifecycle status
    pub status: ExecutionStatus,

    /// Script process exit code (present once finished)
    pub return_code: Option<i32>,

    /// Captured standard output (bounded, tail-truncated)
    pub stdout: Option<String>,

    /// Captured standard error (bounded, tail-truncated)
    pub stderr: Option<String>,

    /// Wall time of the run in milliseconds
    pub execution_time_ms: Option<i64>,

    /// Peak memory usage of the run in bytes
    pub memory_usage_bytes: Option<i64>,

    /// When the dispatcher claimed the execution
    pub started_at: Option<DateTime<Utc>>,

    /// When the execution reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,

    /// When the execution was created
    pub created_at: DateTime<Utc>,

    /// When the execution was last updated
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a new execution
#[derive(Debug, Clone)]
pub struct NewExecution {
    /// Task the execution belongs to
    pub task_id: Uuid,
}
