//! Database operations for the `jobs` queue and `job_unique_keys`.
//!
//! Jobs move `queued -> running -> succeeded | failed`. A failed attempt that
//! still has retries left goes back to `queued` with a later `run_at`.
//! Claiming uses `FOR UPDATE SKIP LOCKED` so concurrent workers never take
//! the same job.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }
}

/// A row from the `jobs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub kind: String,
    pub payload: Value,
    pub status: String,
    /// Number of claims so far, including the current one.
    pub attempts: i32,
    pub max_retries: i32,
    pub unique_key: Option<String>,
    pub run_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRow {
    /// True once the current attempt was the last one allowed.
    #[must_use]
    pub fn retries_exhausted(&self) -> bool {
        self.attempts > self.max_retries
    }
}

#[derive(Debug, Clone)]
pub struct NewJob<'a> {
    pub kind: &'a str,
    pub payload: &'a Value,
    pub max_retries: i32,
    /// Deduplication key and how long it blocks identical jobs.
    pub unique: Option<(&'a str, chrono::Duration)>,
}

const JOB_COLUMNS: &str = "id, kind, payload, status, attempts, max_retries, unique_key, run_at, \
                           locked_at, last_error, created_at, finished_at";

// ---------------------------------------------------------------------------
// jobs operations
// ---------------------------------------------------------------------------

/// Enqueues a job for immediate execution.
///
/// When `unique` is set the key is claimed first; a key still held by an
/// earlier job (not yet expired) suppresses the enqueue and `Ok(None)` is
/// returned. Otherwise returns the new job's id.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement or the transaction fails.
pub async fn enqueue_job(pool: &PgPool, job: &NewJob<'_>) -> Result<Option<Uuid>, DbError> {
    let id = Uuid::new_v4();
    let mut tx = pool.begin().await?;

    if let Some((key, unique_for)) = job.unique {
        // Millisecond precision is plenty for a dedup window.
        #[allow(clippy::cast_precision_loss)]
        let secs = unique_for.num_milliseconds() as f64 / 1000.0;

        let claimed = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO job_unique_keys (unique_key, job_id, expires_at) \
             VALUES ($1, $2, NOW() + make_interval(secs => $3)) \
             ON CONFLICT (unique_key) DO UPDATE SET \
                 job_id = EXCLUDED.job_id, expires_at = EXCLUDED.expires_at \
             WHERE job_unique_keys.expires_at <= NOW() \
             RETURNING job_id",
        )
        .bind(key)
        .bind(id)
        .bind(secs)
        .fetch_optional(&mut *tx)
        .await?;

        if claimed.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }
    }

    sqlx::query(
        "INSERT INTO jobs (id, kind, payload, max_retries, unique_key) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(id)
    .bind(job.kind)
    .bind(job.payload)
    .bind(job.max_retries)
    .bind(job.unique.map(|(key, _)| key))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Some(id))
}

/// Claims the oldest runnable job, marking it `running` and counting the
/// attempt. Returns `None` when nothing is due.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn claim_job(pool: &PgPool) -> Result<Option<JobRow>, DbError> {
    let row = sqlx::query_as::<_, JobRow>(&format!(
        "UPDATE jobs SET status = 'running', attempts = attempts + 1, locked_at = NOW() \
         WHERE id = ( \
             SELECT id FROM jobs \
             WHERE status = 'queued' AND run_at <= NOW() \
             ORDER BY run_at, id \
             FOR UPDATE SKIP LOCKED \
             LIMIT 1 \
         ) \
         RETURNING {JOB_COLUMNS}"
    ))
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Marks a running job `succeeded` and releases its unique key, so an
/// identical job can be enqueued again right away.
///
/// A key already taken over by a newer job is left alone.
///
/// # Errors
///
/// Returns [`DbError::UnexpectedEffect`] if the job is not running, or
/// [`DbError::Sqlx`] if a statement or the transaction fails.
pub async fn complete_job(pool: &PgPool, id: Uuid) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        "UPDATE jobs SET status = 'succeeded', finished_at = NOW(), locked_at = NULL \
         WHERE id = $1 AND status = 'running'",
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;
    crate::expect_one("complete job", result.rows_affected())?;

    sqlx::query(
        "DELETE FROM job_unique_keys k USING jobs j \
         WHERE j.id = $1 AND k.unique_key = j.unique_key AND k.job_id = j.id",
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Puts a running job back in the queue, due at `run_at`.
///
/// # Errors
///
/// Returns [`DbError::UnexpectedEffect`] if the job is not running, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn retry_job(
    pool: &PgPool,
    id: Uuid,
    error: &str,
    run_at: DateTime<Utc>,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE jobs SET status = 'queued', run_at = $2, last_error = $3, locked_at = NULL \
         WHERE id = $1 AND status = 'running'",
    )
    .bind(id)
    .bind(run_at)
    .bind(error)
    .execute(pool)
    .await?;

    crate::expect_one("retry job", result.rows_affected())
}

/// Marks a running job permanently `failed`.
///
/// # Errors
///
/// Returns [`DbError::UnexpectedEffect`] if the job is not running, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn fail_job(pool: &PgPool, id: Uuid, error: &str) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE jobs SET status = 'failed', finished_at = NOW(), last_error = $2, \
                         locked_at = NULL \
         WHERE id = $1 AND status = 'running'",
    )
    .bind(id)
    .bind(error)
    .execute(pool)
    .await?;

    crate::expect_one("fail job", result.rows_affected())
}

/// Re-queues jobs stuck in `running` for longer than `stale_after`, e.g.
/// after a worker crashed mid-job. Returns how many were re-queued.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn requeue_stale_jobs(pool: &PgPool, stale_after: chrono::Duration) -> Result<u64, DbError> {
    let cutoff = Utc::now() - stale_after;

    let result = sqlx::query(
        "UPDATE jobs SET status = 'queued', run_at = NOW(), locked_at = NULL, \
                         last_error = 'requeued after going stale' \
         WHERE status = 'running' AND locked_at < $1",
    )
    .bind(cutoff)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_job(pool: &PgPool, id: Uuid) -> Result<Option<JobRow>, DbError> {
    let row = sqlx::query_as::<_, JobRow>(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(row)
}

/// Lists jobs of one kind, oldest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_jobs_by_kind(pool: &PgPool, kind: &str) -> Result<Vec<JobRow>, DbError> {
    let rows = sqlx::query_as::<_, JobRow>(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE kind = $1 ORDER BY created_at, id"
    ))
    .bind(kind)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
