/// Task model
///
/// Tasks are the core entity of the system: a user-submitted script together
/// with scheduling attributes. A task does not run by itself — each attempt
/// to run it is recorded as a `TaskExecution`.
///
/// # State Machine
///
/// ```text
/// pending → running → completed
///                  → failed
///                  → timeout
///                  → cancelled
/// ```
///
/// A terminal task other than `completed` may be re-run: creating a new
/// execution moves it back through `running`. Cancelling a running execution
/// returns the task to `pending`.
///
/// # Schema
///
/// ```sql
/// CREATE TYPE task_status AS ENUM (
///     'pending', 'running', 'completed', 'failed', 'timeout', 'cancelled'
/// );
/// CREATE TYPE script_type AS ENUM ('python', 'javascript', 'bash', 'go');
///
/// CREATE TABLE tasks (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
///     name VARCHAR(255) NOT NULL,
///     description TEXT,
///     script_content TEXT NOT NULL,
///     script_type script_type NOT NULL,
///     status task_status NOT NULL DEFAULT 'pending',
///     priority INTEGER NOT NULL DEFAULT 5,
///     timeout_seconds INTEGER NOT NULL DEFAULT 300,
///     metadata JSONB,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Task is waiting for an execution to be scheduled
    Pending,

    /// Task has exactly one non-terminal execution
    Running,

    /// Last execution finished cleanly
    Completed,

    /// Last execution failed
    Failed,

    /// Last execution exceeded its timeout
    Timeout,

    /// Last execution was cancelled
    Cancelled,
}

impl TaskStatus {
    /// Converts status to its wire/database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Timeout => "timeout",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Checks if the status is terminal (no further transitions except re-run)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Timeout | TaskStatus::Cancelled
        )
    }

    /// Checks whether a new execution may be created for a task in this status
    ///
    /// Re-running is allowed from `pending` and from every terminal status
    /// except `completed`. A `running` task already has an active execution.
    pub fn can_start_execution(&self) -> bool {
        matches!(
            self,
            TaskStatus::Pending | TaskStatus::Failed | TaskStatus::Timeout | TaskStatus::Cancelled
        )
    }

    /// Checks if transition to `target` is valid
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        match (self, target) {
            (TaskStatus::Pending, TaskStatus::Running) => true,
            (TaskStatus::Pending, TaskStatus::Cancelled) => true,

            (TaskStatus::Running, TaskStatus::Completed) => true,
            (TaskStatus::Running, TaskStatus::Failed) => true,
            (TaskStatus::Running, TaskStatus::Timeout) => true,
            (TaskStatus::Running, TaskStatus::Cancelled) => true,
            // Cancel of a running execution re-queues the task
            (TaskStatus::Running, TaskStatus::Pending) => true,

            // Re-run from terminal states other than completed
            (from, TaskStatus::Running) if from.can_start_execution() => true,

            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "timeout" => Ok(TaskStatus::Timeout),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// Supported script languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "script_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
    Python,
    Javascript,
    Bash,
    Go,
}

impl ScriptType {
    /// Converts the script type to its wire/database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptType::Python => "python",
            ScriptType::Javascript => "javascript",
            ScriptType::Bash => "bash",
            ScriptType::Go => "go",
        }
    }
}

impl fmt::Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScriptType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "python" => Ok(ScriptType::Python),
            "javascript" => Ok(ScriptType::Javascript),
            "bash" => Ok(ScriptType::Bash),
            "go" => Ok(ScriptType::Go),
            other => Err(format!("unknown script type: {}", other)),
        }
    }
}

/// Task model
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    /// Unique task ID
    pub id: Uuid,

    /// Owning user (immutable)
    pub user_id: Uuid,

    /// Human-readable task name
    pub name: String,

    /// Optional description
    pub description: Option<String>,

    /// The script to execute
    pub script_content: String,

    /// Script language
    pub script_type: ScriptType,

    /// Current lifecycle status
    pub status: TaskStatus,

    /// Scheduling priority, 0-10; higher runs earlier
    pub priority: i32,

    /// Per-execution timeout in seconds
    pub timeout_seconds: i32,

    /// Free-form metadata
    pub metadata: Option<JsonValue>,

    /// When the task was created (immutable)
    pub created_at: DateTime<Utc>,

    /// When the task was last updated
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a new task
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Owning user
    pub user_id: Uuid,

    /// Task name
    pub name: String,

    /// Optional description
    pub description: Option<String>,

    /// The script to execute
    pub script_content: String,

    /// Script language
    pub script_type: ScriptType,

    /// Scheduling priority, 0-10 (default 5)
    pub priority: i32,

    /// Per-execution timeout in seconds
    pub timeout_seconds: i32,

    /// Free-form metadata
    pub metadata: Option<JsonValue>,
}

/// Default scheduling priority
pub const DEFAULT_PRIORITY: i32 = 5;

/// Default per-execution timeout in seconds
pub const DEFAULT_TIMEOUT_SECONDS: i32 = 300;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_as_str() {
        assert_eq!(TaskStatus::Pending.as_str(), "pending");
        assert_eq!(TaskStatus::Running.as_str(), "running");
        assert_eq!(TaskStatus::Completed.as_str(), "completed");
        assert_eq!(TaskStatus::Failed.as_str(), "failed");
        assert_eq!(TaskStatus::Timeout.as_str(), "timeout");
        assert_eq!(TaskStatus::Cancelled.as_str(), "cancelled");
    }

    #[test]
    fn test_task_status_round_trip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Timeout,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("sleeping".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_task_status_is_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Timeout.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_can_start_execution() {
        assert!(TaskStatus::Pending.can_start_execution());
        assert!(TaskStatus::Failed.can_start_execution());
        assert!(TaskStatus::Timeout.can_start_execution());
        assert!(TaskStatus::Cancelled.can_start_execution());
        assert!(!TaskStatus::Running.can_start_execution());
        assert!(!TaskStatus::Completed.can_start_execution());
    }

    #[test]
    fn test_task_status_transitions() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Timeout));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Cancelled));

        // Cancel of a running execution re-queues the task
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Pending));

        // Re-run from failed/timeout/cancelled, but never from completed
        assert!(TaskStatus::Failed.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Timeout.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Cancelled.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Running));

        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Pending));
    }

    #[test]
    fn test_script_type_round_trip() {
        for st in [
            ScriptType::Python,
            ScriptType::Javascript,
            ScriptType::Bash,
            ScriptType::Go,
        ] {
            assert_eq!(st.as_str().parse::<ScriptType>().unwrap(), st);
        }
        assert!("ruby".parse::<ScriptType>().is_err());
    }
}
