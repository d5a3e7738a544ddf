//! Job runner loop: claim, decode, run, settle.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clank_db::{DbError, JobRow};
use clank_pipeline::{Job, Pipeline, PipelineError};
use sqlx::PgPool;
use tokio::sync::watch;

use crate::backoff::retry_delay;

/// What happened to a claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Succeeded,
    Retrying,
    Failed,
}

/// Runs jobs until `shutdown` flips to `true`.
///
/// The job in flight when shutdown arrives is finished before returning.
pub async fn run(
    worker: usize,
    pool: PgPool,
    pipeline: Arc<Pipeline>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!(worker, "runner started");

    while !*shutdown.borrow() {
        match run_once(&pool, &pipeline).await {
            Ok(Some(_)) => continue,
            Ok(None) => {}
            Err(e) => tracing::error!(worker, error = %e, "failed to claim or settle job"),
        }

        tokio::select! {
            () = tokio::time::sleep(poll_interval) => {}
            _ = shutdown.changed() => {}
        }
    }

    tracing::debug!(worker, "runner stopped");
}

/// Claims and runs at most one job. Returns `None` when the queue is empty.
///
/// # Errors
///
/// Returns [`DbError`] if the job cannot be claimed or its result cannot
/// be recorded. Job failures themselves are recorded, not returned.
pub async fn run_once(pool: &PgPool, pipeline: &Pipeline) -> Result<Option<Settled>, DbError> {
    let Some(row) = clank_db::claim_job(pool).await? else {
        return Ok(None);
    };

    let job = match Job::decode(&row.kind, &row.payload) {
        Ok(job) => job,
        Err(e) => {
            tracing::error!(job_id = %row.id, kind = %row.kind, error = %e, "undecodable job");
            clank_db::fail_job(pool, row.id, &e.to_string()).await?;
            return Ok(Some(Settled::Failed));
        }
    };

    match pipeline.run(&job).await {
        Ok(outcome) => {
            tracing::debug!(job_id = %row.id, job = %job, outcome = ?outcome, "job finished");
            clank_db::complete_job(pool, row.id).await?;
            Ok(Some(Settled::Succeeded))
        }
        Err(e) => settle_failure(pool, &row, &job, &e).await.map(Some),
    }
}

async fn settle_failure(
    pool: &PgPool,
    row: &JobRow,
    job: &Job,
    error: &PipelineError,
) -> Result<Settled, DbError> {
    if error.is_lock_contention() {
        tracing::warn!(job_id = %row.id, job = %job, attempt = row.attempts, error = %error, "job hit a locked row");
    } else {
        tracing::error!(job_id = %row.id, job = %job, attempt = row.attempts, error = %error, "job failed");
    }

    if row.retries_exhausted() {
        clank_db::fail_job(pool, row.id, &error.to_string()).await?;
        return Ok(Settled::Failed);
    }

    let delay = retry_delay(u32::try_from(row.attempts).unwrap_or(0));
    let run_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
    clank_db::retry_job(pool, row.id, &error.to_string(), run_at).await?;
    Ok(Settled::Retrying)
}
