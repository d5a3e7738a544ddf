use clank_core::AppConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_MIN_CONNECTIONS: u32 = 1;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;

/// `unique_violation`
const SQLSTATE_UNIQUE_VIOLATION: &str = "23505";
/// `lock_not_available`, raised by `FOR ... NOWAIT`.
const SQLSTATE_LOCK_NOT_AVAILABLE: &str = "55P03";

// Path relative to crates/clank-db/Cargo.toml; resolves to <workspace-root>/migrations/
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_connections: config.db_max_connections,
            min_connections: config.db_min_connections,
            acquire_timeout_secs: config.db_acquire_timeout_secs,
        }
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("record not found")]
    NotFound,
    #[error("{operation} affected {actual} rows, expected {expected}")]
    UnexpectedEffect {
        operation: &'static str,
        expected: u64,
        actual: u64,
    },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl DbError {
    /// Postgres SQLSTATE of the underlying database error, if any.
    #[must_use]
    pub fn sqlstate(&self) -> Option<String> {
        match self {
            DbError::Sqlx(sqlx::Error::Database(e)) => e.code().map(std::borrow::Cow::into_owned),
            _ => None,
        }
    }

    /// True when a unique or primary-key constraint rejected the write.
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        self.sqlstate().as_deref() == Some(SQLSTATE_UNIQUE_VIOLATION)
    }

    /// True when a `NOWAIT` row lock was already held by another transaction.
    #[must_use]
    pub fn is_lock_not_available(&self) -> bool {
        self.sqlstate().as_deref() == Some(SQLSTATE_LOCK_NOT_AVAILABLE)
    }
}

pub(crate) fn expect_one(operation: &'static str, actual: u64) -> Result<(), DbError> {
    if actual == 1 {
        Ok(())
    } else {
        Err(DbError::UnexpectedEffect {
            operation,
            expected: 1,
            actual,
        })
    }
}

/// Connect to a Postgres pool using explicit URL and config.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if the connection cannot be established.
pub async fn connect_pool(database_url: &str, config: PoolConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(database_url)
        .await
}

/// Run all pending migrations against the pool.
///
/// Returns the number of migrations that were applied.
///
/// # Errors
///
/// Returns [`sqlx::migrate::MigrateError`] if any migration fails.
pub async fn run_migrations(pool: &PgPool) -> Result<usize, sqlx::migrate::MigrateError> {
    // _sqlx_migrations does not exist on a fresh database; count that as zero.
    let applied_before: i64 =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = true")
            .fetch_one(pool)
            .await
            .unwrap_or(0);

    MIGRATOR.run(pool).await?;

    let applied_after: i64 =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = true")
            .fetch_one(pool)
            .await
            .unwrap_or(0);

    let delta = (applied_after - applied_before).max(0);
    Ok(usize::try_from(delta).unwrap_or(0))
}

/// Send a `SELECT 1` to verify the pool has a live connection.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if the query fails.
pub async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await?;
    Ok(())
}


pub mod breaker_counters;
pub mod feedback;
pub mod issues;
pub mod jobs;
pub mod pagination;
pub mod products;
pub mod reviews;
pub mod suggestions;

pub use breaker_counters::{
    delete_breaker_counter, get_breaker_failures, increment_breaker_failures,
    set_breaker_failures,
};
pub use feedback::{
    add_feedback_tokens, feedback_hash, get_feedback, insert_feedback, list_unprocessed_feedback_ids,
    lock_feedback, mark_feedback_processed, FeedbackRow, NewFeedback,
};
pub use issues::{
    bulk_create_partial_issues, create_issue, delete_partial_issue, get_issue,
    get_partial_issue, list_partial_issue_ids, list_similar_issues, lock_issue,
    update_aggregated_issue, IssueRow, IssueUpdate, NewIssue, NewPartialIssue, PartialIssueRow,
};
pub use jobs::{
    claim_job, complete_job, enqueue_job, fail_job, get_job, list_jobs_by_kind,
    requeue_stale_jobs, retry_job, JobRow, JobStatus, NewJob,
};
pub use pagination::{Cursor, Page};
pub use products::{
    get_organization, get_product, insert_organization, insert_product, soft_delete_product,
    NewOrganization, NewProduct, OrganizationRow, ProductRow,
};
pub use reviews::{get_review_by_feedback_id, insert_review, NewReview, ReviewRow};
pub use suggestions::{
    bulk_create_partial_suggestions, create_suggestion, delete_partial_suggestion,
    get_partial_suggestion, get_suggestion, list_partial_suggestion_ids,
    list_similar_suggestions, lock_suggestion, update_aggregated_suggestion, NewPartialSuggestion,
    NewSuggestion, PartialSuggestionRow, SuggestionRow, SuggestionUpdate,
};
