//! `breaker` command handlers.

use std::sync::Arc;
use std::time::Duration;

use clank_core::{AppConfig, BreakerBackend};
use clank_pipeline::{Breaker, MemoryCounterStore, PgCounterStore, BREAKER_THRESHOLD};
use clap::Subcommand;

/// Sub-commands available under `breaker`.
#[derive(Debug, Subcommand)]
pub enum BreakerCommands {
    /// Show the failure count and whether engine calls are being refused
    Status,
    /// Record one engine failure, as a timed-out call would
    Open,
    /// Refuse engine calls for a fixed period
    Force {
        /// How long to keep the breaker open, in seconds
        #[arg(long, default_value = "300")]
        secs: u64,
    },
    /// Clear the failure count
    Close,
}

/// Builds the breaker the worker would use for this config.
pub(crate) fn build(pool: &sqlx::PgPool, config: &AppConfig) -> Breaker {
    match config.breaker_backend {
        BreakerBackend::Postgres => Breaker::new(Arc::new(PgCounterStore::new(pool.clone()))),
        BreakerBackend::Memory => {
            tracing::warn!("breaker backend is memory; state is local to this process");
            Breaker::new(Arc::new(MemoryCounterStore::new()))
        }
    }
}

/// # Errors
///
/// Returns an error if the breaker counter cannot be read or written.
pub(crate) async fn run_breaker_command(
    breaker: &Breaker,
    command: BreakerCommands,
) -> anyhow::Result<()> {
    match command {
        BreakerCommands::Status => {}
        BreakerCommands::Open => breaker.open().await?,
        BreakerCommands::Force { secs } => breaker.force(Duration::from_secs(secs)).await?,
        BreakerCommands::Close => breaker.close().await?,
    }

    let failures = breaker.failures().await?;
    let state = if breaker.is_open().await { "open" } else { "closed" };
    match failures {
        Some(n) => println!("breaker {state}: {n}/{BREAKER_THRESHOLD} failures"),
        None => println!("breaker {state}: no recent failures"),
    }

    Ok(())
}
