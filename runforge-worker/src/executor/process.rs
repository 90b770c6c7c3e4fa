/// Local process executor
///
/// Runs scripts with the matching interpreter on the worker host. This is
/// the unsandboxed runner: it gives Runforge a working end-to-end path on a
/// trusted host, while isolation stays the deploying operator's concern
/// (containerize the worker, or substitute another `Executor`).
///
/// The script is written to a per-execution temp file, the interpreter is
/// spawned with piped output, and the child is killed when the cancellation
/// token fires or the worker's deadline drops the run future
/// (`kill_on_drop`). A non-zero exit is a *finished* run; only spawn
/// failures and interpreter absence are errors.

use super::{ExecutionContext, ExecutionOutcome, ExecutionReport, Executor, ExecutorError};
use async_trait::async_trait;
use chrono::Utc;
use runforge_shared::models::ScriptType;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Local process executor
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        ProcessExecutor
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn runner_for(script_type: ScriptType) -> (&'static str, &'static [&'static str], &'static str) {
    // (program, leading args, script file extension)
    match script_type {
        ScriptType::Python => ("python3", &[], "py"),
        ScriptType::Javascript => ("node", &[], "js"),
        ScriptType::Bash => ("bash", &[], "sh"),
        ScriptType::Go => ("go", &["run"], "go"),
    }
}

fn script_path(ctx: &ExecutionContext, extension: &str) -> PathBuf {
    std::env::temp_dir().join(format!("runforge-{}.{}", ctx.execution_id, extension))
}

#[async_trait]
impl Executor for ProcessExecutor {
    fn name(&self) -> &str {
        "process"
    }

    async fn run(&self, ctx: ExecutionContext) -> Result<ExecutionReport, ExecutorError> {
        let (program, args, extension) = runner_for(ctx.script_type);
        let path = script_path(&ctx, extension);

        tokio::fs::write(&path, &ctx.script_content)
            .await
            .map_err(|e| ExecutorError::Internal(format!("failed to stage script: {}", e)))?;

        let started_at = Utc::now();
        let spawned = Command::new(program)
            .args(args)
            .arg(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                tokio::fs::remove_file(&path).await.ok();
                if e.kind() == std::io::ErrorKind::NotFound {
                    return Err(ExecutorError::Unsupported(format!(
                        "{} ({} not installed)",
                        ctx.script_type, program
                    )));
                }
                return Err(ExecutorError::ExecutionFailed(format!(
                    "failed to spawn {}: {}",
                    program, e
                )));
            }
        };

        let report = tokio::select! {
            output = child.wait_with_output() => {
                match output {
                    Ok(output) => Ok(ExecutionReport {
                        return_code: output.status.code(),
                        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                        started_at,
                        completed_at: Utc::now(),
                        peak_memory_bytes: None,
                        outcome: ExecutionOutcome::Finished,
                    }),
                    Err(e) => Err(ExecutorError::ExecutionFailed(format!(
                        "failed to collect output: {}",
                        e
                    ))),
                }
            }
            _ = ctx.cancel.cancelled() => {
                // Dropping the wait future kills the child (kill_on_drop)
                Ok(ExecutionReport {
                    return_code: None,
                    stdout: String::new(),
                    stderr: "process killed".to_string(),
                    started_at,
                    completed_at: Utc::now(),
                    peak_memory_bytes: None,
                    outcome: ExecutionOutcome::Killed,
                })
            }
        };

        tokio::fs::remove_file(&path).await.ok();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn context(script: &str, script_type: ScriptType) -> ExecutionContext {
        ExecutionContext {
            execution_id: Uuid::new_v4(),
            script_content: script.to_string(),
            script_type,
            timeout: Duration::from_secs(5),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn test_runner_mapping() {
        assert_eq!(runner_for(ScriptType::Python).0, "python3");
        assert_eq!(runner_for(ScriptType::Javascript).0, "node");
        assert_eq!(runner_for(ScriptType::Bash).0, "bash");
        assert_eq!(runner_for(ScriptType::Go), ("go", &["run"][..], "go"));
    }

    #[tokio::test]
    async fn test_bash_script_captures_output() {
        let report = ProcessExecutor::new()
            .run(context("echo hello", ScriptType::Bash))
            .await
            .unwrap();
        assert_eq!(report.outcome, ExecutionOutcome::Finished);
        assert_eq!(report.return_code, Some(0));
        assert_eq!(report.stdout, "hello\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_still_finishes() {
        let report = ProcessExecutor::new()
            .run(context("exit 7", ScriptType::Bash))
            .await
            .unwrap();
        assert_eq!(report.outcome, ExecutionOutcome::Finished);
        assert_eq!(report.return_code, Some(7));
    }

    #[tokio::test]
    async fn test_cancellation_kills_process() {
        let ctx = context("sleep 30", ScriptType::Bash);
        let cancel = ctx.cancel.clone();

        let handle = tokio::spawn(async move { ProcessExecutor::new().run(ctx).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.outcome, ExecutionOutcome::Killed);
    }
}
