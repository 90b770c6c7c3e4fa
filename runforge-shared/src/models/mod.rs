/// Database models and domain types
///
/// This module contains the core entities of the Runforge system:
///
/// - `User`: identity principal owning tasks
/// - `Task`: a user-submitted, script-bearing unit of work
/// - `TaskExecution`: one attempted run of a task, with its own lifecycle
///
/// Status enums carry the transition rules; all persistence goes through
/// the repositories in `crate::store`.

pub mod execution;
pub mod task;
pub mod user;

pub use execution::{ExecutionStatus, NewExecution, TaskExecution};
pub use task::{NewTask, ScriptType, Task, TaskStatus};
pub use user::{NewUser, User};
