//! # Runforge API Server
//!
//! Boots configuration, the database pool and migrations, the embedded
//! worker manager, and the HTTP server. `SIGINT` triggers a graceful stop:
//! the listener drains, then the manager gets its shutdown grace period.

use runforge_api::app::{build_router, AppState};
use runforge_api::config::Config;
use runforge_shared::db::migrations::run_migrations;
use runforge_shared::db::pool::{create_pool, DatabaseConfig};
use runforge_shared::store::postgres::PgStore;
use runforge_shared::store::Store;
use runforge_worker::executor::ProcessExecutor;
use runforge_worker::manager::{Manager, ManagerConfig, ReapPolicy};
use runforge_worker::pool::WorkerConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn manager_config(config: &Config) -> ManagerConfig {
    ManagerConfig {
        slot_capacity: config.worker.slots,
        per_user_slots: config.worker.user_slots,
        worker: WorkerConfig {
            poll_interval: Duration::from_millis(config.worker.poll_interval_ms),
            batch_size: config.worker.batch_size,
            max_output_bytes: config.worker.max_output_bytes,
            ..WorkerConfig::default()
        },
        reap_policy: config
            .worker
            .reap_policy
            .parse()
            .unwrap_or(ReapPolicy::Requeue),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "runforge_api=debug,runforge_worker=debug,runforge_shared=debug,tower_http=info"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.bind_address(),
        "Runforge API starting"
    );

    let pool = create_pool(DatabaseConfig {
        url: config.database.url.clone(),
        max_connections: config.database.max_connections,
        ..DatabaseConfig::default()
    })
    .await?;
    run_migrations(&pool).await?;

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));
    let manager = Manager::new(
        store.clone(),
        Arc::new(ProcessExecutor::new()),
        manager_config(&config),
    );
    manager.start().await?;

    let shutdown_grace = Duration::from_secs(config.worker.shutdown_grace_seconds);
    let bind_address = config.bind_address();
    let state = AppState::new(store, config, manager.clone());

    // Periodic eviction of stale rate-limit buckets
    let limiter = state.limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            limiter.sweep(Duration::from_secs(2 * 3600));
        }
    });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!(address = %bind_address, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    })
    .await?;

    manager.stop(shutdown_grace).await;
    tracing::info!("Runforge API stopped");
    Ok(())
}
