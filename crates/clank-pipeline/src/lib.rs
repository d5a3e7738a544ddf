//! Feedback extraction and deduplication pipeline.
//!
//! [`Processor`] extracts partial issues, partial suggestions and a review
//! from each piece of feedback. [`Aggregator`] folds each partial into a
//! canonical cluster. Both sit behind the shared engine [`Breaker`] and the
//! organization usage quota.

pub mod aggregator;
pub mod breaker;
pub mod enqueue;
pub mod error;
pub mod jobs;
pub mod outcome;
pub mod processor;
pub mod quota;
pub mod schedule;

use std::sync::Arc;

use clank_engine::EngineClient;
use sqlx::PgPool;

pub use aggregator::{
    Aggregator, Cluster, ClusterKind, Draft, Fragment, IssueKind, SuggestionKind,
    SIMILARITY_THRESHOLD, SIMILAR_LIMIT,
};
pub use breaker::{
    Breaker, CounterStore, MemoryCounterStore, PgCounterStore, BREAKER_KEY, BREAKER_THRESHOLD,
    BREAKER_TTL,
};
pub use enqueue::{EnqueueOptions, Enqueuer, PgEnqueuer};
pub use error::{BreakerError, EnqueueError, JobDecodeError, PipelineError};
pub use jobs::Job;
pub use outcome::{AggregateOutcome, JobOutcome, ProcessOutcome, SkipReason, WalkSummary};
pub use processor::Processor;
pub use quota::Tenant;

/// Everything needed to run any [`Job`].
pub struct Pipeline {
    pool: PgPool,
    enqueuer: Arc<dyn Enqueuer>,
    processor: Processor,
    issues: Aggregator<IssueKind>,
    suggestions: Aggregator<SuggestionKind>,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        pool: PgPool,
        engine: EngineClient,
        breaker: Breaker,
        enqueuer: Arc<dyn Enqueuer>,
    ) -> Self {
        let processor = Processor::new(
            pool.clone(),
            engine.clone(),
            breaker.clone(),
            Arc::clone(&enqueuer),
        );
        let issues = Aggregator::new(IssueKind, pool.clone(), engine.clone(), breaker.clone());
        let suggestions = Aggregator::new(SuggestionKind, pool.clone(), engine, breaker);

        Self {
            pool,
            enqueuer,
            processor,
            issues,
            suggestions,
        }
    }

    /// Shorthand for a pipeline that enqueues follow-up jobs into Postgres.
    #[must_use]
    pub fn with_pg_queue(pool: PgPool, engine: EngineClient, breaker: Breaker) -> Self {
        let enqueuer = Arc::new(PgEnqueuer::new(pool.clone()));
        Self::new(pool, engine, breaker, enqueuer)
    }

    #[must_use]
    pub fn processor(&self) -> &Processor {
        &self.processor
    }

    #[must_use]
    pub fn issue_aggregator(&self) -> &Aggregator<IssueKind> {
        &self.issues
    }

    #[must_use]
    pub fn suggestion_aggregator(&self) -> &Aggregator<SuggestionKind> {
        &self.suggestions
    }

    /// Runs one job to completion.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] when the job failed and should be retried.
    pub async fn run(&self, job: &Job) -> Result<JobOutcome, PipelineError> {
        let enqueuer = self.enqueuer.as_ref();
        let outcome = match *job {
            Job::ProcessFeedback { feedback_id } => {
                JobOutcome::Process(self.processor.process(feedback_id).await?)
            }
            Job::AggregateIssue { partial_id } => {
                JobOutcome::Aggregate(self.issues.aggregate(partial_id).await?)
            }
            Job::AggregateSuggestion { partial_id } => {
                JobOutcome::Aggregate(self.suggestions.aggregate(partial_id).await?)
            }
            Job::ScheduleProcessFeedback => {
                JobOutcome::Walk(schedule::walk_unprocessed_feedback(&self.pool, enqueuer).await?)
            }
            Job::ScheduleAggregateIssue => {
                JobOutcome::Walk(schedule::walk_partial_issues(&self.pool, enqueuer).await?)
            }
            Job::ScheduleAggregateSuggestion => {
                JobOutcome::Walk(schedule::walk_partial_suggestions(&self.pool, enqueuer).await?)
            }
        };

        Ok(outcome)
    }
}
