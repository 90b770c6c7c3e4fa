//! # Runforge Worker
//!
//! Standalone worker process: connects to the shared store, reaps orphaned
//! executions, and runs the worker pool against the local process executor.
//! The API server embeds the same manager in-process; this binary exists
//! for deployments that scale the worker side separately.
//!
//! ## Usage
//!
//! ```bash
//! DATABASE_URL=postgresql://... cargo run -p runforge-worker
//! ```

use runforge_shared::db::migrations::run_migrations;
use runforge_shared::db::pool::{create_pool, DatabaseConfig};
use runforge_shared::store::postgres::PgStore;
use runforge_shared::store::Store;
use runforge_worker::executor::ProcessExecutor;
use runforge_worker::manager::{Manager, ManagerConfig};
use runforge_worker::pool::WorkerConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn manager_config_from_env() -> ManagerConfig {
    let slot_capacity = env_parse("WORKER_SLOTS", 10usize);
    ManagerConfig {
        slot_capacity,
        per_user_slots: env_parse("WORKER_USER_SLOTS", slot_capacity),
        worker: WorkerConfig {
            poll_interval: Duration::from_millis(env_parse("WORKER_POLL_INTERVAL_MS", 1000u64)),
            batch_size: env_parse("WORKER_BATCH_SIZE", 10i64),
            max_output_bytes: env_parse("WORKER_MAX_OUTPUT_BYTES", 64 * 1024usize),
            ..WorkerConfig::default()
        },
        reap_policy: env_parse("WORKER_REAP_POLICY", "requeue".to_string())
            .parse()
            .unwrap_or(runforge_worker::manager::ReapPolicy::Requeue),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "runforge_worker=debug,runforge_shared=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Runforge worker v{} starting", env!("CARGO_PKG_VERSION"));

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;
    let pool = create_pool(DatabaseConfig {
        url: database_url,
        ..DatabaseConfig::default()
    })
    .await?;
    run_migrations(&pool).await?;

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));
    let manager = Manager::new(
        store,
        Arc::new(ProcessExecutor::new()),
        manager_config_from_env(),
    );
    manager.start().await?;

    tracing::info!("worker ready, waiting for executions");
    tokio::signal::ctrl_c().await?;

    tracing::info!("shutdown signal received");
    manager.stop(Duration::from_secs(30)).await;
    Ok(())
}
