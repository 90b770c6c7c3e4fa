/// Business-logic services
///
/// Handlers and workers never touch repositories directly for mutations;
/// they go through the services here. [`ExecutionService`] owns the
/// task/execution state machine and runs every multi-row mutation inside a
/// store transaction, so task status and execution status can never be
/// observed disagreeing. [`TaskService`] owns the task-side rules the HTTP
/// surface needs (ownership checks, the running-task mutation guard).

pub mod executions;
pub mod tasks;

pub use executions::ExecutionService;
pub use tasks::{TaskChanges, TaskService};

use crate::store::{StoreError, StoreTransaction};

/// Service-level errors, mapped onto HTTP by the API layer
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Target entity does not exist
    #[error("{0}")]
    NotFound(String),

    /// Caller is authenticated but does not own the target
    #[error("{0}")]
    Forbidden(String),

    /// A state-machine precondition failed
    #[error("{0}")]
    Conflict(String),

    /// Input violated a business rule
    #[error("{0}")]
    Validation(String),

    /// Invariant violation; these are bugs and are logged loudly
    #[error("internal error: {0}")]
    Internal(String),

    /// Underlying storage failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Commits the transaction when the operation succeeded, rolls it back
/// otherwise. On rollback neither row of a two-row mutation is observable
/// as changed.
pub(crate) async fn commit_or_rollback<T>(
    tx: Box<dyn StoreTransaction>,
    result: ServiceResult<T>,
) -> ServiceResult<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "transaction rollback failed");
            }
            Err(err)
        }
    }
}
