/// Mock executor for tests and demos
///
/// Behavior is scripted through the submitted script content, one
/// directive per run (first match wins):
///
/// | directive      | behavior                                            |
/// |----------------|-----------------------------------------------------|
/// | `sleep:<ms>`   | sleeps, then finishes with exit code 0              |
/// | `exit:<code>`  | finishes immediately with the given exit code       |
/// | `fail`         | returns an `ExecutorError` (transport-level failure)|
/// | `hang`         | blocks until the cancellation token fires           |
/// | `panic`        | panics (exercises the worker's panic recovery)      |
/// | anything else  | finishes with exit code 0 and a fixed stdout line   |
///
/// All paths respect the cancellation token and report `Killed` when it
/// fires mid-run.

use super::{ExecutionContext, ExecutionOutcome, ExecutionReport, Executor, ExecutorError};
use async_trait::async_trait;
use chrono::Utc;
use tokio::time::{sleep, Duration};

/// Mock executor
pub struct MockExecutor;

impl MockExecutor {
    pub fn new() -> Self {
        MockExecutor
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn directive_value(script: &str, prefix: &str) -> Option<u64> {
    script
        .lines()
        .find_map(|line| line.trim().strip_prefix(prefix))
        .and_then(|v| v.trim().parse().ok())
}

#[async_trait]
impl Executor for MockExecutor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn run(&self, ctx: ExecutionContext) -> Result<ExecutionReport, ExecutorError> {
        let started_at = Utc::now();
        let script = ctx.script_content.as_str();

        tracing::debug!(execution_id = %ctx.execution_id, "mock executor starting");

        if script.contains("panic") {
            panic!("mock executor panic requested");
        }

        if script.contains("fail") {
            return Err(ExecutorError::ExecutionFailed(
                "mock failure requested".to_string(),
            ));
        }

        if script.contains("hang") {
            ctx.cancel.cancelled().await;
            return Ok(ExecutionReport {
                return_code: None,
                stdout: String::new(),
                stderr: "killed while hanging".to_string(),
                started_at,
                completed_at: Utc::now(),
                peak_memory_bytes: None,
                outcome: ExecutionOutcome::Killed,
            });
        }

        if let Some(ms) = directive_value(script, "sleep:") {
            tokio::select! {
                _ = sleep(Duration::from_millis(ms)) => {}
                _ = ctx.cancel.cancelled() => {
                    return Ok(ExecutionReport {
                        return_code: None,
                        stdout: String::new(),
                        stderr: "killed during sleep".to_string(),
                        started_at,
                        completed_at: Utc::now(),
                        peak_memory_bytes: None,
                        outcome: ExecutionOutcome::Killed,
                    });
                }
            }
        }

        let return_code = directive_value(script, "exit:").map(|c| c as i32).unwrap_or(0);

        Ok(ExecutionReport {
            return_code: Some(return_code),
            stdout: "mock run complete\n".to_string(),
            stderr: String::new(),
            started_at,
            completed_at: Utc::now(),
            peak_memory_bytes: Some(1024 * 1024),
            outcome: ExecutionOutcome::Finished,
        })
    }
}
