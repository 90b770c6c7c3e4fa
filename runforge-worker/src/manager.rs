/// Worker manager
///
/// Owns the worker-side lifecycle: reaps executions orphaned by a previous
/// process on start, runs the pool loop, and drains in-flight workers
/// against a deadline on stop. Health and statistics surface through
/// [`Manager::stats`] for the `/health/workers` probe.

use crate::executor::Executor;
use crate::pool::{WorkerConfig, WorkerPool, WorkerPoolStats};
use crate::slots::{SlotManager, SlotStats};
use chrono::Utc;
use runforge_shared::models::{ExecutionStatus, TaskStatus};
use runforge_shared::service::{ExecutionService, ServiceError};
use runforge_shared::store::{Store, StoreError};
use serde::Serialize;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What to do with executions left `running` by a dead process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapPolicy {
    /// Re-queue them as `pending`; the task stays `running` and the
    /// dispatcher picks the execution up again
    Requeue,

    /// Finalize them as `failed("lost during restart")`
    Fail,
}

impl FromStr for ReapPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requeue" => Ok(ReapPolicy::Requeue),
            "fail" => Ok(ReapPolicy::Fail),
            other => Err(format!("unknown reap policy: {}", other)),
        }
    }
}

/// Manager configuration
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Global concurrency slot capacity
    pub slot_capacity: usize,

    /// Per-user slot cap (defaults to the full capacity)
    pub per_user_slots: usize,

    /// Worker pool tuning
    pub worker: WorkerConfig,

    /// Startup policy for orphaned running executions
    pub reap_policy: ReapPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            slot_capacity: 10,
            per_user_slots: 10,
            worker: WorkerConfig::default(),
            reap_policy: ReapPolicy::Requeue,
        }
    }
}

/// Manager errors
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("manager is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Point-in-time manager statistics
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ManagerStats {
    pub is_running: bool,
    pub is_healthy: bool,
    pub worker_pool: WorkerPoolStats,
    pub concurrency: SlotStats,
}

struct ManagerInner {
    store: Arc<dyn Store>,
    service: ExecutionService,
    slots: SlotManager,
    pool: WorkerPool,
    reap_policy: ReapPolicy,
    shutdown: CancellationToken,
    running: AtomicBool,
    healthy: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Worker manager handle; cheap to clone
#[derive(Clone)]
pub struct Manager {
    inner: Arc<ManagerInner>,
}

impl Manager {
    pub fn new(store: Arc<dyn Store>, executor: Arc<dyn Executor>, config: ManagerConfig) -> Self {
        let service = ExecutionService::new(store.clone());
        let slots = SlotManager::new(config.slot_capacity, config.per_user_slots);
        let shutdown = CancellationToken::new();
        let pool = WorkerPool::new(
            store.clone(),
            service.clone(),
            executor,
            slots.clone(),
            config.worker.clone(),
            shutdown.clone(),
        );

        Manager {
            inner: Arc::new(ManagerInner {
                store,
                service,
                slots,
                pool,
                reap_policy: config.reap_policy,
                shutdown,
                running: AtomicBool::new(false),
                healthy: AtomicBool::new(true),
                handle: Mutex::new(None),
            }),
        }
    }

    /// Reaps orphans, then spawns the pool loop
    pub async fn start(&self) -> Result<(), ManagerError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(ManagerError::AlreadyRunning);
        }

        self.reap_orphans().await?;

        let pool = self.inner.pool.clone();
        let handle = tokio::spawn(async move { pool.run().await });
        *self
            .inner
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handle);

        tracing::info!("worker manager started");
        Ok(())
    }

    /// Stops the pool and drains in-flight workers
    ///
    /// Workers that finish before the deadline finalize normally; if any
    /// are still running past it, the manager degrades to unhealthy and
    /// leaves their executions for the next startup's reaping.
    pub async fn stop(&self, deadline: Duration) {
        tracing::info!(deadline_ms = deadline.as_millis() as u64, "worker manager stopping");
        self.inner.shutdown.cancel();

        let handle = self
            .inner
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        let drained = tokio::time::timeout(deadline, async {
            if let Some(handle) = handle {
                let _ = handle.await;
            }
            while self.inner.pool.stats().active_workers > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        if drained.is_err() {
            let left = self.inner.pool.stats().active_workers;
            tracing::warn!(
                active_workers = left,
                "stop deadline passed with workers still running"
            );
            self.inner.healthy.store(false, Ordering::SeqCst);
        }

        self.inner.running.store(false, Ordering::SeqCst);
        tracing::info!("worker manager stopped");
    }

    /// Current statistics
    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            is_running: self.inner.running.load(Ordering::SeqCst),
            is_healthy: self.is_healthy(),
            worker_pool: self.inner.pool.stats(),
            concurrency: self.inner.slots.stats(),
        }
    }

    /// Healthy means: no failed stop behind us and the pool's executor
    /// path is not persistently failing
    pub fn is_healthy(&self) -> bool {
        self.inner.healthy.load(Ordering::SeqCst) && self.inner.pool.is_healthy()
    }

    /// Handles executions left `running` by a previous process
    ///
    /// After a restart the per-process worker registry is empty, so every
    /// stored `running` execution is an orphan.
    async fn reap_orphans(&self) -> Result<(), ManagerError> {
        let repos = self.inner.store.repos();
        let orphans = repos.executions().list_running().await?;
        if orphans.is_empty() {
            return Ok(());
        }

        tracing::warn!(
            count = orphans.len(),
            policy = ?self.inner.reap_policy,
            "reaping orphaned running executions"
        );

        for execution in orphans {
            match self.inner.reap_policy {
                ReapPolicy::Requeue => {
                    let requeued = repos
                        .executions()
                        .update_status(
                            execution.id,
                            Some(ExecutionStatus::Running),
                            ExecutionStatus::Pending,
                        )
                        .await?;
                    if requeued {
                        tracing::info!(execution_id = %execution.id, "orphan re-queued as pending");
                    }
                }
                ReapPolicy::Fail => {
                    let Some(task) = repos.tasks().get_by_id(execution.task_id).await? else {
                        continue;
                    };

                    let mut row = execution.clone();
                    row.status = ExecutionStatus::Failed;
                    row.stderr = Some("lost during restart".to_string());
                    row.completed_at = Some(Utc::now());

                    match self
                        .inner
                        .service
                        .finalize_execution(&row, TaskStatus::Failed, task.user_id)
                        .await
                    {
                        Ok(()) => {
                            tracing::info!(execution_id = %execution.id, "orphan marked failed")
                        }
                        Err(ServiceError::Conflict(_)) | Err(ServiceError::NotFound(_)) => {}
                        Err(ServiceError::Store(e)) => return Err(e.into()),
                        Err(e) => {
                            tracing::error!(execution_id = %execution.id, error = %e, "orphan reap failed")
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
