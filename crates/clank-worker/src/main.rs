mod backoff;
mod runner;
mod scheduler;

use std::sync::Arc;
use std::time::Duration;

use clank_core::BreakerBackend;
use clank_engine::EngineClient;
use clank_pipeline::{Breaker, CounterStore, MemoryCounterStore, PgCounterStore, Pipeline};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(clank_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = clank_db::PoolConfig::from_app_config(&config);
    let pool = clank_db::connect_pool(&config.database_url, pool_config).await?;
    clank_db::run_migrations(&pool).await?;

    let store: Arc<dyn CounterStore> = match config.breaker_backend {
        BreakerBackend::Postgres => Arc::new(PgCounterStore::new(pool.clone())),
        BreakerBackend::Memory => Arc::new(MemoryCounterStore::new()),
    };
    let breaker = Breaker::new(store);
    let engine = EngineClient::new(
        &config.engine_base_url,
        Duration::from_secs(config.engine_timeout_secs),
    )?;
    let pipeline = Arc::new(Pipeline::with_pg_queue(pool.clone(), engine, breaker));

    let mut scheduler = scheduler::build_scheduler(pool.clone(), Arc::clone(&config)).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let poll_interval = Duration::from_millis(config.worker_poll_interval_ms);
    let mut runners = tokio::task::JoinSet::new();
    for worker in 0..config.worker_concurrency.max(1) {
        runners.spawn(runner::run(
            worker,
            pool.clone(),
            Arc::clone(&pipeline),
            poll_interval,
            shutdown_rx.clone(),
        ));
    }
    tracing::info!(
        workers = config.worker_concurrency.max(1),
        engine = %config.engine_base_url,
        "worker started"
    );

    shutdown_signal().await;
    shutdown_tx.send_replace(true);
    scheduler.shutdown().await?;
    while runners.join_next().await.is_some() {}

    pool.close().await;
    tracing::info!("worker stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
