//! Recovery walks: re-enqueue every unit of work that may have lost its job.
//!
//! Each walk pages through its table and enqueues one job per row with the
//! 24h recovery window, so rows whose job is still pending are not doubled.

use clank_db::{Cursor, DbError, Page};
use sqlx::PgPool;
use uuid::Uuid;

use crate::enqueue::{EnqueueOptions, Enqueuer};
use crate::error::PipelineError;
use crate::jobs::Job;
use crate::outcome::WalkSummary;

pub const WALK_PAGE_SIZE: i64 = 1000;

/// Enqueues a process job for every translated, unprocessed feedback.
///
/// # Errors
///
/// Returns [`PipelineError::Db`] if a page cannot be read. Individual
/// enqueue failures are logged and skipped.
pub async fn walk_unprocessed_feedback(
    pool: &PgPool,
    enqueuer: &dyn Enqueuer,
) -> Result<WalkSummary, PipelineError> {
    walk(
        "feedback",
        |after| clank_db::list_unprocessed_feedback_ids(pool, after, WALK_PAGE_SIZE),
        |feedback_id| Job::ProcessFeedback { feedback_id },
        enqueuer,
    )
    .await
}

/// Enqueues an aggregate job for every remaining partial issue.
///
/// # Errors
///
/// Same as [`walk_unprocessed_feedback`].
pub async fn walk_partial_issues(
    pool: &PgPool,
    enqueuer: &dyn Enqueuer,
) -> Result<WalkSummary, PipelineError> {
    walk(
        "partial issues",
        |after| clank_db::list_partial_issue_ids(pool, after, WALK_PAGE_SIZE),
        |partial_id| Job::AggregateIssue { partial_id },
        enqueuer,
    )
    .await
}

/// Enqueues an aggregate job for every remaining partial suggestion.
///
/// # Errors
///
/// Same as [`walk_unprocessed_feedback`].
pub async fn walk_partial_suggestions(
    pool: &PgPool,
    enqueuer: &dyn Enqueuer,
) -> Result<WalkSummary, PipelineError> {
    walk(
        "partial suggestions",
        |after| clank_db::list_partial_suggestion_ids(pool, after, WALK_PAGE_SIZE),
        |partial_id| Job::AggregateSuggestion { partial_id },
        enqueuer,
    )
    .await
}

async fn walk<F, Fut, J>(
    target: &'static str,
    mut fetch: F,
    job_for: J,
    enqueuer: &dyn Enqueuer,
) -> Result<WalkSummary, PipelineError>
where
    F: FnMut(Option<Cursor>) -> Fut,
    Fut: std::future::Future<Output = Result<Page<Uuid>, DbError>>,
    J: Fn(Uuid) -> Job,
{
    let mut summary = WalkSummary::default();
    let mut after = None;

    loop {
        let page = fetch(after).await?;

        for id in page.items {
            summary.visited += 1;
            let job = job_for(id);
            match enqueuer.enqueue(&job, EnqueueOptions::RECOVERY).await {
                Ok(true) => summary.enqueued += 1,
                Ok(false) => {}
                Err(e) => tracing::error!(job = %job, error = %e, "failed to enqueue recovery job"),
            }
        }

        match page.next {
            Some(cursor) => after = Some(cursor),
            None => break,
        }
    }

    tracing::info!(
        target_rows = target,
        visited = summary.visited,
        enqueued = summary.enqueued,
        "recovery walk finished"
    );

    Ok(summary)
}
