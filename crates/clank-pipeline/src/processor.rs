//! Turns one piece of feedback into partial issues, partial suggestions and a
//! review, then hands the partials to the aggregators.

use std::sync::Arc;

use chrono::Utc;
use clank_core::processable_content;
use clank_db::{DbError, NewPartialIssue, NewPartialSuggestion, NewReview};
use clank_engine::{EngineClient, ExtractionInput};
use sqlx::PgPool;
use uuid::Uuid;

use crate::breaker::Breaker;
use crate::enqueue::{EnqueueOptions, Enqueuer};
use crate::error::PipelineError;
use crate::jobs::Job;
use crate::outcome::{ProcessOutcome, SkipReason};
use crate::quota;

#[derive(Clone)]
pub struct Processor {
    pool: PgPool,
    engine: EngineClient,
    breaker: Breaker,
    enqueuer: Arc<dyn Enqueuer>,
}

impl Processor {
    #[must_use]
    pub fn new(
        pool: PgPool,
        engine: EngineClient,
        breaker: Breaker,
        enqueuer: Arc<dyn Enqueuer>,
    ) -> Self {
        Self {
            pool,
            engine,
            breaker,
            enqueuer,
        }
    }

    /// Processes one feedback at most once.
    ///
    /// The three extractions run concurrently and all of them finish before
    /// their results are inspected. Everything is persisted in one
    /// transaction; aggregation jobs are enqueued after it commits.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Engine`] if any extraction fails (issues,
    /// then suggestions, then review decide which error is reported), or
    /// [`PipelineError::Db`] if a lookup or the transaction fails.
    pub async fn process(&self, feedback_id: Uuid) -> Result<ProcessOutcome, PipelineError> {
        if self.breaker.is_open().await {
            return Ok(skipped(feedback_id, SkipReason::BreakerOpen));
        }

        let Some(feedback) = clank_db::get_feedback(&self.pool, feedback_id).await? else {
            return Ok(skipped(feedback_id, SkipReason::FeedbackNotFound));
        };
        if feedback.processed_at.is_some() {
            return Ok(skipped(feedback_id, SkipReason::AlreadyProcessed));
        }

        let tenant = match quota::check(&self.pool, feedback.product_id).await? {
            Ok(tenant) => tenant,
            Err(reason) => return Ok(skipped(feedback_id, reason)),
        };

        let Some(content) = processable_content(
            &feedback.content,
            &feedback.language,
            &feedback.translation,
            &tenant.product.language,
        ) else {
            return Ok(skipped(feedback_id, SkipReason::NoContent));
        };

        let input = ExtractionInput {
            context: &tenant.product.context,
            categories: &tenant.product.categories,
            feedback: content,
        };

        let (issues, suggestions, review) = tokio::join!(
            self.breaker.guard(self.engine.extract_issues(&input)),
            self.breaker.guard(self.engine.extract_suggestions(&input)),
            self.breaker.guard(self.engine.extract_review(&input)),
        );
        let issues = issues?;
        let suggestions = suggestions?;
        let review = review?;

        let now = Utc::now();
        let tokens = issues.usage.total() + suggestions.usage.total() + review.usage.total();

        let partial_issues: Vec<NewPartialIssue> = issues
            .issues
            .into_iter()
            .map(|issue| NewPartialIssue {
                id: Uuid::new_v4(),
                feedback_id,
                title: issue.title,
                description: issue.description,
                steps: issue.steps,
                severity: issue.severity,
                category: issue.category,
                created_at: now,
            })
            .collect();

        let partial_suggestions: Vec<NewPartialSuggestion> = suggestions
            .suggestions
            .into_iter()
            .map(|suggestion| NewPartialSuggestion {
                id: Uuid::new_v4(),
                feedback_id,
                title: suggestion.title,
                description: suggestion.description,
                reason: suggestion.reason,
                importance: suggestion.importance,
                category: suggestion.category,
                created_at: now,
            })
            .collect();

        let new_review = NewReview {
            id: Uuid::new_v4(),
            product_id: tenant.product.id,
            feedback_id,
            keywords: review.review.keywords,
            sentiment: review.review.sentiment,
            emotions: review.review.emotions,
            intention: review.review.intention,
            category: review.review.category,
            created_at: now,
        };

        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        clank_db::bulk_create_partial_issues(&mut *tx, &partial_issues).await?;
        clank_db::bulk_create_partial_suggestions(&mut *tx, &partial_suggestions).await?;
        clank_db::insert_review(&mut *tx, &new_review).await?;
        clank_db::mark_feedback_processed(&mut *tx, feedback_id, tokens, now).await?;
        tx.commit().await.map_err(DbError::from)?;

        let follow_ups = partial_issues
            .iter()
            .map(|p| Job::AggregateIssue { partial_id: p.id })
            .chain(
                partial_suggestions
                    .iter()
                    .map(|p| Job::AggregateSuggestion { partial_id: p.id }),
            );
        for job in follow_ups {
            if let Err(e) = self.enqueuer.enqueue(&job, EnqueueOptions::FOLLOW_UP).await {
                tracing::error!(job = %job, error = %e, "failed to enqueue aggregation");
            }
        }

        tracing::info!(
            feedback_id = %feedback_id,
            issues = partial_issues.len(),
            suggestions = partial_suggestions.len(),
            tokens,
            "processed feedback with 1 review"
        );

        Ok(ProcessOutcome::Processed {
            issues: partial_issues.len(),
            suggestions: partial_suggestions.len(),
            tokens,
        })
    }
}

fn skipped(feedback_id: Uuid, reason: SkipReason) -> ProcessOutcome {
    tracing::debug!(feedback_id = %feedback_id, reason = %reason, "skipping feedback");
    ProcessOutcome::Skipped(reason)
}
