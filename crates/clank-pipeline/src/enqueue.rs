use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::EnqueueError;
use crate::jobs::Job;

/// Retry and deduplication policy for one enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Retries after the first attempt.
    pub max_retries: i32,
    /// While set, an identical job enqueued within this window is dropped.
    pub unique_for: Option<Duration>,
}

impl EnqueueOptions {
    /// Aggregation jobs enqueued by the processor.
    pub const FOLLOW_UP: Self = Self {
        max_retries: 2,
        unique_for: Some(Duration::from_secs(12 * 60 * 60)),
    };

    /// Jobs enqueued by the recovery walks and the walks themselves.
    pub const RECOVERY: Self = Self {
        max_retries: 2,
        unique_for: Some(Duration::from_secs(24 * 60 * 60)),
    };
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self::FOLLOW_UP
    }
}

#[async_trait]
pub trait Enqueuer: Send + Sync {
    /// Returns `false` when a uniqueness window suppressed the job.
    async fn enqueue(&self, job: &Job, options: EnqueueOptions) -> Result<bool, EnqueueError>;
}

/// Enqueues into the `jobs` table.
#[derive(Debug, Clone)]
pub struct PgEnqueuer {
    pool: PgPool,
}

impl PgEnqueuer {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Enqueuer for PgEnqueuer {
    async fn enqueue(&self, job: &Job, options: EnqueueOptions) -> Result<bool, EnqueueError> {
        let payload = job.payload()?;
        let unique_key = options.unique_for.map(|_| job.unique_key()).transpose()?;
        let unique = unique_key.as_deref().zip(options.unique_for).map(|(key, window)| {
            (
                key,
                chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX),
            )
        });

        let id = clank_db::enqueue_job(
            &self.pool,
            &clank_db::NewJob {
                kind: job.kind(),
                payload: &payload,
                max_retries: options.max_retries,
                unique,
            },
        )
        .await?;

        match id {
            Some(id) => tracing::debug!(job = %job, job_id = %id, "job enqueued"),
            None => tracing::debug!(job = %job, "duplicate job suppressed"),
        }

        Ok(id.is_some())
    }
}
