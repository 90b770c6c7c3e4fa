/// Executor contract
///
/// The worker treats script execution as a black box behind this trait: it
/// hands over the script, a timeout, and a cancellation token, and gets
/// back a report describing what happened. Sandboxing, interpreters, and
/// resource accounting are the implementation's business.
///
/// # Outcome translation
///
/// The worker maps the report's outcome onto an execution status:
///
/// ```text
/// finished  → completed   (even when return_code != 0)
/// errored   → failed
/// timed_out → timeout
/// killed    → cancelled
/// ```
///
/// Failure semantics of the script itself live in `return_code`, not in
/// the status.

pub mod mock;
pub mod process;

pub use mock::MockExecutor;
pub use process::ProcessExecutor;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use runforge_shared::models::ScriptType;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Executor error types
///
/// These are transport-level failures (interpreter missing, spawn failed,
/// executor bug); a script exiting non-zero is NOT an error.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The run could not be started or crashed mid-way
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// No runner available for the script type
    #[error("unsupported script type: {0}")]
    Unsupported(String),

    /// Internal executor error
    #[error("internal executor error: {0}")]
    Internal(String),
}

/// How a run ended, as observed by the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The script ran to completion (inspect `return_code`)
    Finished,

    /// The run broke down before the script could finish
    Errored,

    /// The run hit its deadline
    TimedOut,

    /// The run was killed via the cancellation token
    Killed,
}

/// Everything the executor needs for one run
pub struct ExecutionContext {
    /// Execution being run (for logging and temp-file naming)
    pub execution_id: Uuid,

    /// The script source
    pub script_content: String,

    /// Script language
    pub script_type: ScriptType,

    /// Deadline for the run
    pub timeout: Duration,

    /// Cancelled by the manager on shutdown or by tests
    pub cancel: CancellationToken,
}

/// The collected result of one run
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// Script process exit code, when one exists
    pub return_code: Option<i32>,

    /// Captured standard output (unbounded; the worker truncates)
    pub stdout: String,

    /// Captured standard error (unbounded; the worker truncates)
    pub stderr: String,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run ended
    pub completed_at: DateTime<Utc>,

    /// Peak memory usage, when the runner can measure it
    pub peak_memory_bytes: Option<i64>,

    /// How the run ended
    pub outcome: ExecutionOutcome,
}

impl ExecutionReport {
    /// Builds a report for a run that never produced real output
    pub fn synthetic(outcome: ExecutionOutcome, stderr: impl Into<String>) -> Self {
        let now = Utc::now();
        ExecutionReport {
            return_code: None,
            stdout: String::new(),
            stderr: stderr.into(),
            started_at: now,
            completed_at: now,
            peak_memory_bytes: None,
            outcome,
        }
    }
}

/// The script runner contract
#[async_trait]
pub trait Executor: Send + Sync {
    /// Runner name, for logs and stats
    fn name(&self) -> &str;

    /// Runs one script to completion, cancellation, or deadline
    ///
    /// Implementations must watch `ctx.cancel` and return a `Killed` report
    /// promptly when it fires.
    async fn run(&self, ctx: ExecutionContext) -> Result<ExecutionReport, ExecutorError>;
}
