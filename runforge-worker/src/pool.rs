/// Worker pool
///
/// One logical poll loop fetches pending executions (task priority first,
/// then age), the dispatcher gates each one on a concurrency slot and a
/// conditional claim, and a spawned worker task runs the script and feeds
/// the result back through the execution service.
///
/// # Failure containment
///
/// A worker never propagates a per-execution failure beyond that
/// execution: executor errors become a `failed` execution, panics are
/// recovered with a synthetic stderr, and `NotFound`/`Conflict` from
/// finalize mean someone else (deletion, user cancel) won — the result is
/// discarded and the slot released.

use crate::executor::{ExecutionContext, ExecutionOutcome, ExecutionReport, Executor};
use crate::slots::{SlotError, SlotManager};
use chrono::Utc;
use futures::FutureExt;
use rand::Rng;
use runforge_shared::models::ExecutionStatus;
use runforge_shared::service::{ExecutionService, ServiceError};
use runforge_shared::store::{PendingExecution, Store};
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// What to do with an execution interrupted by shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPolicy {
    /// Leave it `running`; the next startup reaps it
    Leave,

    /// Finalize it as `cancelled` before exiting
    Cancel,
}

impl FromStr for ShutdownPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "leave" => Ok(ShutdownPolicy::Leave),
            "cancel" => Ok(ShutdownPolicy::Cancel),
            other => Err(format!("unknown shutdown policy: {}", other)),
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Base interval between polls
    pub poll_interval: Duration,

    /// Cap for the exponential backoff on empty polls
    pub max_backoff: Duration,

    /// Executions fetched per poll
    pub batch_size: i64,

    /// Bounded wait for a slot before leaving an execution pending
    pub dispatch_wait: Duration,

    /// Per-stream output bound; the tail is kept on truncation
    pub max_output_bytes: usize,

    /// Consecutive executor/poll errors before the pool reports unhealthy
    pub unhealthy_threshold: u32,

    /// Behavior for runs interrupted by shutdown
    pub shutdown_policy: ShutdownPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            poll_interval: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            batch_size: 10,
            dispatch_wait: Duration::from_millis(200),
            max_output_bytes: 64 * 1024,
            unhealthy_threshold: 5,
            shutdown_policy: ShutdownPolicy::Leave,
        }
    }
}

/// Point-in-time worker pool statistics
#[derive(Debug, Clone, Copy, Serialize)]
pub struct WorkerPoolStats {
    pub pool_size: usize,
    pub active_workers: usize,
    pub idle_workers: usize,
    pub unhealthy_workers: usize,
    pub total_tasks_processed: u64,
    pub total_tasks_successful: u64,
    pub total_tasks_failed: u64,
    pub average_task_time_ms: u64,
}

/// Internal counters; workers are homogeneous spawned tasks, so
/// `unhealthy_workers` reports whether the executor path is currently
/// failing rather than tracking individual worker identities
struct PoolCounters {
    pool_size: usize,
    active: AtomicUsize,
    processed: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    total_time_ms: AtomicU64,
    consecutive_errors: AtomicU32,
    unhealthy_threshold: u32,
}

impl PoolCounters {
    fn new(pool_size: usize, unhealthy_threshold: u32) -> Self {
        PoolCounters {
            pool_size,
            active: AtomicUsize::new(0),
            processed: AtomicU64::new(0),
            successful: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            total_time_ms: AtomicU64::new(0),
            consecutive_errors: AtomicU32::new(0),
            unhealthy_threshold,
        }
    }

    fn worker_started(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    fn worker_finished(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.consecutive_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_ok(&self) {
        self.consecutive_errors.store(0, Ordering::Relaxed);
    }

    fn record_result(&self, status: ExecutionStatus, elapsed: Duration) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        match status {
            ExecutionStatus::Completed => {
                self.successful.fetch_add(1, Ordering::Relaxed);
            }
            ExecutionStatus::Failed | ExecutionStatus::Timeout => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        self.total_time_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    fn is_healthy(&self) -> bool {
        self.consecutive_errors.load(Ordering::Relaxed) < self.unhealthy_threshold
    }

    fn snapshot(&self) -> WorkerPoolStats {
        let active = self.active.load(Ordering::Relaxed);
        let processed = self.processed.load(Ordering::Relaxed);
        let total_time = self.total_time_ms.load(Ordering::Relaxed);
        WorkerPoolStats {
            pool_size: self.pool_size,
            active_workers: active,
            idle_workers: self.pool_size.saturating_sub(active),
            unhealthy_workers: if self.is_healthy() { 0 } else { 1 },
            total_tasks_processed: processed,
            total_tasks_successful: self.successful.load(Ordering::Relaxed),
            total_tasks_failed: self.failed.load(Ordering::Relaxed),
            average_task_time_ms: if processed > 0 { total_time / processed } else { 0 },
        }
    }
}

struct PoolInner {
    store: Arc<dyn Store>,
    service: ExecutionService,
    executor: Arc<dyn Executor>,
    slots: SlotManager,
    config: WorkerConfig,
    counters: PoolCounters,
    shutdown: CancellationToken,
}

/// Worker pool handle; cheap to clone
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn Store>,
        service: ExecutionService,
        executor: Arc<dyn Executor>,
        slots: SlotManager,
        config: WorkerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let counters = PoolCounters::new(slots.capacity(), config.unhealthy_threshold);
        WorkerPool {
            inner: Arc::new(PoolInner {
                store,
                service,
                executor,
                slots,
                config,
                counters,
                shutdown,
            }),
        }
    }

    /// Runs the poll/dispatch loop until the shutdown token fires
    ///
    /// In-flight worker tasks are not awaited here; the manager drains them
    /// against its stop deadline.
    pub async fn run(&self) {
        let inner = &self.inner;
        tracing::info!(
            capacity = inner.slots.capacity(),
            batch_size = inner.config.batch_size,
            executor = inner.executor.name(),
            "worker pool started"
        );

        let mut backoff = inner.config.poll_interval;
        loop {
            if inner.shutdown.is_cancelled() {
                break;
            }

            match inner
                .store
                .repos()
                .executions()
                .list_pending(inner.config.batch_size)
                .await
            {
                Ok(batch) if !batch.is_empty() => {
                    inner.counters.record_ok();
                    backoff = inner.config.poll_interval;
                    for pending in batch {
                        if inner.shutdown.is_cancelled() {
                            break;
                        }
                        self.dispatch(pending).await;
                    }
                    self.sleep_or_shutdown(inner.config.poll_interval).await;
                }
                Ok(_) => {
                    self.sleep_or_shutdown(with_jitter(backoff)).await;
                    backoff = (backoff * 2).min(inner.config.max_backoff);
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to poll for pending executions");
                    inner.counters.record_error();
                    self.sleep_or_shutdown(with_jitter(backoff)).await;
                    backoff = (backoff * 2).min(inner.config.max_backoff);
                }
            }
        }

        tracing::info!("worker pool stopped");
    }

    /// Whether the executor/poll path has been failing repeatedly
    pub fn is_healthy(&self) -> bool {
        self.inner.counters.is_healthy()
    }

    /// Current statistics
    pub fn stats(&self) -> WorkerPoolStats {
        self.inner.counters.snapshot()
    }

    async fn sleep_or_shutdown(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.inner.shutdown.cancelled() => {}
        }
    }

    /// Gates one pending execution on a slot and the claim, then hands it
    /// to a worker task
    async fn dispatch(&self, pending: PendingExecution) {
        let inner = &self.inner;
        let execution_id = pending.execution.id;

        let slot = match inner
            .slots
            .try_acquire_timeout(pending.user_id, inner.config.dispatch_wait)
            .await
        {
            Ok(slot) => slot,
            Err(SlotError::Timeout) | Err(SlotError::UserLimit) => {
                // Stays pending; the next poll retries
                tracing::debug!(execution_id = %execution_id, "no slot available");
                return;
            }
            Err(e) => {
                tracing::warn!(execution_id = %execution_id, error = %e, "slot acquisition failed");
                return;
            }
        };

        let claimed = match inner.store.repos().executions().try_claim(execution_id).await {
            Ok(claimed) => claimed,
            Err(e) => {
                tracing::error!(execution_id = %execution_id, error = %e, "claim failed");
                slot.release();
                return;
            }
        };
        if !claimed {
            // Another dispatcher got there first
            tracing::debug!(execution_id = %execution_id, "execution already claimed");
            slot.release();
            return;
        }

        let pool = self.clone();
        tokio::spawn(async move {
            pool.inner.counters.worker_started();
            let outcome = AssertUnwindSafe(pool.run_one(&pending)).catch_unwind().await;
            if outcome.is_err() {
                pool.handle_panic(&pending).await;
            }
            pool.inner.counters.worker_finished();
            slot.release();
        });
    }

    /// Runs one claimed execution through the executor and finalizes it
    async fn run_one(&self, pending: &PendingExecution) {
        let inner = &self.inner;
        let execution_id = pending.execution.id;
        let deadline = Duration::from_secs(pending.timeout_seconds.max(1) as u64);
        let started_wall = Utc::now();
        let started = Instant::now();

        let ctx = ExecutionContext {
            execution_id,
            script_content: pending.script_content.clone(),
            script_type: pending.script_type,
            timeout: deadline,
            cancel: inner.shutdown.child_token(),
        };

        tracing::info!(
            execution_id = %execution_id,
            executor = inner.executor.name(),
            timeout_seconds = pending.timeout_seconds,
            "executing script"
        );

        let report = match tokio::time::timeout(deadline, inner.executor.run(ctx)).await {
            Ok(Ok(report)) => {
                inner.counters.record_ok();
                report
            }
            Ok(Err(e)) => {
                inner.counters.record_error();
                tracing::warn!(execution_id = %execution_id, error = %e, "executor error");
                let mut report = ExecutionReport::synthetic(ExecutionOutcome::Errored, e.to_string());
                report.started_at = started_wall;
                report
            }
            Err(_) => {
                inner.counters.record_ok();
                tracing::warn!(
                    execution_id = %execution_id,
                    timeout_seconds = pending.timeout_seconds,
                    "execution hit its deadline"
                );
                let mut report = ExecutionReport::synthetic(
                    ExecutionOutcome::TimedOut,
                    format!(
                        "execution exceeded timeout of {}s",
                        pending.timeout_seconds
                    ),
                );
                report.started_at = started_wall;
                report
            }
        };

        if report.outcome == ExecutionOutcome::Killed
            && inner.shutdown.is_cancelled()
            && inner.config.shutdown_policy == ShutdownPolicy::Leave
        {
            tracing::info!(
                execution_id = %execution_id,
                "shutdown in flight, leaving execution for startup reaping"
            );
            return;
        }

        let status = match report.outcome {
            ExecutionOutcome::Finished => ExecutionStatus::Completed,
            ExecutionOutcome::Errored => ExecutionStatus::Failed,
            ExecutionOutcome::TimedOut => ExecutionStatus::Timeout,
            ExecutionOutcome::Killed => ExecutionStatus::Cancelled,
        };

        self.finalize(pending, status, &report, started.elapsed()).await;
    }

    /// Persists the result through the service; `NotFound` and `Conflict`
    /// are non-fatal discards
    async fn finalize(
        &self,
        pending: &PendingExecution,
        status: ExecutionStatus,
        report: &ExecutionReport,
        elapsed: Duration,
    ) {
        let inner = &self.inner;
        let Some(task_status) = status.task_status() else {
            tracing::error!(status = %status, "refusing to finalize a non-terminal status");
            return;
        };

        let mut row = pending.execution.clone();
        row.status = status;
        row.return_code = report.return_code;
        row.stdout = Some(truncate_output(&report.stdout, inner.config.max_output_bytes));
        row.stderr = Some(truncate_output(&report.stderr, inner.config.max_output_bytes));
        row.execution_time_ms = Some(
            (report.completed_at - report.started_at)
                .num_milliseconds()
                .max(0),
        );
        row.memory_usage_bytes = report.peak_memory_bytes;
        row.started_at = Some(report.started_at);
        row.completed_at = Some(report.completed_at);

        match inner
            .service
            .finalize_execution(&row, task_status, pending.user_id)
            .await
        {
            Ok(()) => {
                inner.counters.record_result(status, elapsed);
                tracing::info!(
                    execution_id = %row.id,
                    status = %status,
                    return_code = ?row.return_code,
                    "execution finalized"
                );
            }
            Err(ServiceError::NotFound(_)) => {
                tracing::debug!(execution_id = %row.id, "task vanished mid-run, result discarded");
            }
            Err(ServiceError::Conflict(reason)) => {
                tracing::debug!(execution_id = %row.id, reason = %reason, "result discarded");
            }
            Err(e) => {
                tracing::error!(execution_id = %row.id, error = %e, "finalize failed");
                inner.counters.record_error();
            }
        }
    }

    /// Recovers a panicked worker: synthetic stderr, execution `failed`
    async fn handle_panic(&self, pending: &PendingExecution) {
        tracing::error!(
            execution_id = %pending.execution.id,
            "worker panicked during execution"
        );
        self.inner.counters.record_error();

        let report = ExecutionReport::synthetic(
            ExecutionOutcome::Errored,
            "worker panicked during execution",
        );
        self.finalize(pending, ExecutionStatus::Failed, &report, Duration::ZERO)
            .await;
    }
}

fn with_jitter(duration: Duration) -> Duration {
    let quarter = (duration.as_millis() / 4) as u64;
    if quarter == 0 {
        return duration;
    }
    duration + Duration::from_millis(rand::thread_rng().gen_range(0..=quarter))
}

/// Bounds an output stream, keeping its tail and flagging the cut
pub(crate) fn truncate_output(output: &str, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output.to_string();
    }
    let mut start = output.len() - max_bytes;
    while !output.is_char_boundary(start) {
        start += 1;
    }
    format!("[output truncated]\n{}", &output[start..])
}
