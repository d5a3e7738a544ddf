mod breaker;
mod jobs;
mod run;

use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::breaker::BreakerCommands;
use crate::jobs::JobsCommands;

#[derive(Debug, Parser)]
#[command(name = "clank-cli")]
#[command(about = "Clank feedback pipeline command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Inspect or override the engine circuit breaker
    Breaker {
        #[command(subcommand)]
        command: BreakerCommands,
    },
    /// Run one pipeline step in-process, bypassing the queue
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Enqueue a recovery walk now instead of waiting for its cron
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommands,
    },
    /// Inspect the job queue
    Jobs {
        #[command(subcommand)]
        command: JobsCommands,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    Ping,
    Migrate,
}

#[derive(Debug, Subcommand)]
enum RunCommands {
    /// Extract partial issues, suggestions and a review from one feedback
    Process { feedback_id: Uuid },
    /// Fold one partial issue into its cluster
    AggregateIssue { partial_id: Uuid },
    /// Fold one partial suggestion into its cluster
    AggregateSuggestion { partial_id: Uuid },
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum ScheduleCommands {
    /// Enqueue processing for every unprocessed feedback
    Feedback,
    /// Enqueue aggregation for every leftover partial issue
    Issues,
    /// Enqueue aggregation for every leftover partial suggestion
    Suggestions,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("clank-cli ready; run with --help to list commands");
        return Ok(());
    };

    let config = clank_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = clank_db::PoolConfig::from_app_config(&config);
    let pool = clank_db::connect_pool(&config.database_url, pool_config).await?;

    match command {
        Commands::Db { command } => match command {
            DbCommands::Ping => {
                clank_db::ping(&pool).await?;
                println!("database ok");
            }
            DbCommands::Migrate => {
                let applied = clank_db::run_migrations(&pool).await?;
                println!("migrations up to date ({applied} applied)");
            }
        },
        Commands::Breaker { command } => {
            let breaker = breaker::build(&pool, &config);
            breaker::run_breaker_command(&breaker, command).await?;
        }
        Commands::Run { command } => {
            let engine = clank_engine::EngineClient::new(
                &config.engine_base_url,
                Duration::from_secs(config.engine_timeout_secs),
            )?;
            let pipeline = clank_pipeline::Pipeline::with_pg_queue(
                pool.clone(),
                engine,
                breaker::build(&pool, &config),
            );
            let job = match command {
                RunCommands::Process { feedback_id } => {
                    clank_pipeline::Job::ProcessFeedback { feedback_id }
                }
                RunCommands::AggregateIssue { partial_id } => {
                    clank_pipeline::Job::AggregateIssue { partial_id }
                }
                RunCommands::AggregateSuggestion { partial_id } => {
                    clank_pipeline::Job::AggregateSuggestion { partial_id }
                }
            };
            run::run_job(&pipeline, &job).await?;
        }
        Commands::Schedule { command } => {
            let job = match command {
                ScheduleCommands::Feedback => clank_pipeline::Job::ScheduleProcessFeedback,
                ScheduleCommands::Issues => clank_pipeline::Job::ScheduleAggregateIssue,
                ScheduleCommands::Suggestions => clank_pipeline::Job::ScheduleAggregateSuggestion,
            };
            run::enqueue_walk(&pool, &job).await?;
        }
        Commands::Jobs { command } => jobs::run_jobs_command(&pool, command).await?,
    }

    pool.close().await;
    Ok(())
}
