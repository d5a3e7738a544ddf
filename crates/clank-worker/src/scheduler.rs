//! Cron triggers for the recovery walks and the stale-job reaper.
//!
//! The cron jobs only enqueue; the walks themselves run through the queue
//! like any other job, so a missed tick is retried and concurrent workers
//! never walk twice within the unique window.

use std::sync::Arc;

use clank_core::AppConfig;
use clank_pipeline::{EnqueueOptions, Enqueuer, Job, PgEnqueuer};
use sqlx::PgPool;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler, JobSchedulerError};

const STALE_REAPER_CRON: &str = "0 */5 * * * *";

/// Builds and starts the cron scheduler.
///
/// The returned handle must be kept alive; dropping it stops every trigger.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if a cron expression is invalid or the
/// scheduler fails to start.
pub async fn build_scheduler(
    pool: PgPool,
    config: Arc<AppConfig>,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;
    let enqueuer: Arc<dyn Enqueuer> = Arc::new(PgEnqueuer::new(pool.clone()));

    register_trigger(
        &scheduler,
        &config.process_schedule_cron,
        Job::ScheduleProcessFeedback,
        Arc::clone(&enqueuer),
    )
    .await?;
    register_trigger(
        &scheduler,
        &config.issue_schedule_cron,
        Job::ScheduleAggregateIssue,
        Arc::clone(&enqueuer),
    )
    .await?;
    register_trigger(
        &scheduler,
        &config.suggestion_schedule_cron,
        Job::ScheduleAggregateSuggestion,
        enqueuer,
    )
    .await?;
    register_stale_reaper(&scheduler, pool, config.job_stale_after_secs).await?;

    scheduler.start().await?;
    Ok(scheduler)
}

async fn register_trigger(
    scheduler: &JobScheduler,
    cron: &str,
    job: Job,
    enqueuer: Arc<dyn Enqueuer>,
) -> Result<(), JobSchedulerError> {
    let trigger = CronJob::new_async(cron, move |_uuid, _lock| {
        let enqueuer = Arc::clone(&enqueuer);

        Box::pin(async move {
            match enqueuer.enqueue(&job, EnqueueOptions::RECOVERY).await {
                Ok(true) => tracing::info!(job = %job, "scheduler: enqueued recovery walk"),
                Ok(false) => {
                    tracing::info!(job = %job, "scheduler: recovery walk already pending");
                }
                Err(e) => {
                    tracing::error!(job = %job, error = %e, "scheduler: failed to enqueue recovery walk");
                }
            }
        })
    })?;

    scheduler.add(trigger).await?;
    tracing::debug!(job = %job, cron, "scheduler: registered trigger");
    Ok(())
}

/// Every five minutes, puts jobs whose worker vanished back in the queue.
async fn register_stale_reaper(
    scheduler: &JobScheduler,
    pool: PgPool,
    stale_after_secs: u64,
) -> Result<(), JobSchedulerError> {
    let pool = Arc::new(pool);
    let secs = i64::try_from(stale_after_secs)
        .unwrap_or(i64::MAX)
        .min(i64::MAX / 1000);
    let stale_after = chrono::Duration::seconds(secs);

    let reaper = CronJob::new_async(STALE_REAPER_CRON, move |_uuid, _lock| {
        let pool = Arc::clone(&pool);

        Box::pin(async move {
            match clank_db::requeue_stale_jobs(&pool, stale_after).await {
                Ok(0) => {}
                Ok(requeued) => tracing::warn!(requeued, "scheduler: requeued stale jobs"),
                Err(e) => tracing::error!(error = %e, "scheduler: failed to requeue stale jobs"),
            }
        })
    })?;

    scheduler.add(reaper).await?;
    Ok(())
}
