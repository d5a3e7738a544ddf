//! Deduplicates partial issues and suggestions into canonical clusters.
//!
//! [`Aggregator`] holds the algorithm once; [`ClusterKind`] supplies the
//! storage and engine calls that differ between issues and suggestions.

mod issue;
mod suggestion;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clank_core::{ClusterStats, Contribution};
use clank_db::{DbError, FeedbackRow};
use clank_engine::{EngineClient, EngineError, Similarity, Usage};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::breaker::Breaker;
use crate::error::PipelineError;
use crate::outcome::{AggregateOutcome, SkipReason};
use crate::quota;

pub use issue::IssueKind;
pub use suggestion::SuggestionKind;

/// Minimum cosine similarity for a cluster to be offered to the engine.
pub const SIMILARITY_THRESHOLD: f64 = 0.6;

/// Most clusters offered to the engine for ranking.
pub const SIMILAR_LIMIT: i64 = 10;

/// Text content of a partial or cluster that the engine can merge.
pub trait Draft: Clone + Send + Sync {
    fn description(&self) -> &str;
}

/// A partial awaiting aggregation.
#[derive(Debug, Clone)]
pub struct Fragment<D> {
    pub id: Uuid,
    pub feedback_id: Uuid,
    pub draft: D,
    /// Severity or importance.
    pub label: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

/// A canonical cluster, either loaded for a merge or about to be created.
#[derive(Debug, Clone)]
pub struct Cluster<D> {
    pub id: Uuid,
    pub product_id: Uuid,
    pub draft: D,
    pub embedding: Vec<f32>,
    pub stats: ClusterStats,
}

/// Storage and engine calls for one kind of cluster.
#[async_trait]
pub trait ClusterKind: Send + Sync {
    type Draft: Draft;

    /// Lower-case singular name used in logs and errors.
    fn name(&self) -> &'static str;

    async fn get_fragment(
        &self,
        pool: &PgPool,
        id: Uuid,
    ) -> Result<Option<Fragment<Self::Draft>>, DbError>;

    async fn delete_fragment(&self, conn: &mut PgConnection, id: Uuid) -> Result<(), DbError>;

    /// Clusters of the product similar to `embedding`, most similar first.
    async fn list_similar(
        &self,
        pool: &PgPool,
        embedding: &[f32],
        product_id: Uuid,
    ) -> Result<Vec<Cluster<Self::Draft>>, DbError>;

    /// Loads a cluster under a row lock that fails instead of waiting.
    async fn lock(
        &self,
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Cluster<Self::Draft>>, DbError>;

    /// Inserts the cluster and links it to `feedback_id`.
    async fn create(
        &self,
        conn: &mut PgConnection,
        cluster: &Cluster<Self::Draft>,
        created_at: DateTime<Utc>,
        feedback_id: Uuid,
    ) -> Result<(), DbError>;

    /// Rewrites the cluster and links it to `feedback_id`.
    async fn update(
        &self,
        conn: &mut PgConnection,
        cluster: &Cluster<Self::Draft>,
        feedback_id: Uuid,
    ) -> Result<(), DbError>;

    async fn rank(
        &self,
        engine: &EngineClient,
        description: &str,
        options: &[&str],
    ) -> Result<Similarity, EngineError>;

    /// Merges `fragment` into `cluster`; returns the merged content.
    async fn merge(
        &self,
        engine: &EngineClient,
        fragment: &Self::Draft,
        cluster: &Self::Draft,
    ) -> Result<(Self::Draft, Usage), EngineError>;
}

pub struct Aggregator<K> {
    kind: K,
    pool: PgPool,
    engine: EngineClient,
    breaker: Breaker,
}

impl<K: ClusterKind> Aggregator<K> {
    #[must_use]
    pub fn new(kind: K, pool: PgPool, engine: EngineClient, breaker: Breaker) -> Self {
        Self {
            kind,
            pool,
            engine,
            breaker,
        }
    }

    /// Disposes of one partial: it becomes a new cluster, is merged into the
    /// most similar existing one, or is discarded if its feedback already
    /// counts towards that cluster. The partial is deleted in every case.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Engine`] on engine failure,
    /// [`PipelineError::Db`] if a query or transaction fails (including when
    /// another worker holds the target cluster's lock), or
    /// [`PipelineError::ClusterVanished`] if the chosen cluster was deleted
    /// before it could be locked.
    pub async fn aggregate(&self, partial_id: Uuid) -> Result<AggregateOutcome, PipelineError> {
        if self.breaker.is_open().await {
            return Ok(self.skipped(partial_id, SkipReason::BreakerOpen));
        }

        let Some(fragment) = self.kind.get_fragment(&self.pool, partial_id).await? else {
            return Ok(self.skipped(partial_id, SkipReason::PartialNotFound));
        };
        let Some(feedback) = clank_db::get_feedback(&self.pool, fragment.feedback_id).await? else {
            return Ok(self.skipped(partial_id, SkipReason::FeedbackNotFound));
        };
        let tenant = match quota::check(&self.pool, feedback.product_id).await? {
            Ok(tenant) => tenant,
            Err(reason) => return Ok(self.skipped(partial_id, reason)),
        };

        let description = fragment.draft.description();
        if description.is_empty() {
            return Ok(self.skipped(partial_id, SkipReason::EmptyDescription));
        }

        let embedding = self
            .breaker
            .guard(self.engine.compute_embedding(description))
            .await?;
        let mut tokens = embedding.usage.total();

        let similar = self
            .kind
            .list_similar(&self.pool, &embedding.embedding, tenant.product.id)
            .await?;
        let contribution = contribution(&fragment, &feedback);

        if similar.is_empty() {
            return self
                .create(fragment, embedding.embedding, &contribution, tenant.product.id, tokens)
                .await;
        }

        let options: Vec<&str> = similar.iter().map(|c| c.draft.description()).collect();
        let ranking = self
            .breaker
            .guard(self.kind.rank(&self.engine, description, &options))
            .await?;
        tokens += ranking.usage.total();

        let target = match ranking.option {
            None => None,
            Some(index) => {
                let target = similar.get(index);
                if target.is_none() {
                    tracing::warn!(
                        kind = self.kind.name(),
                        partial_id = %partial_id,
                        option = index,
                        options = similar.len(),
                        "engine picked a nonexistent option, creating a new cluster"
                    );
                }
                target
            }
        };

        match target {
            Some(target) => self.merge(&fragment, target.id, &contribution, tokens).await,
            None => {
                self.create(fragment, embedding.embedding, &contribution, tenant.product.id, tokens)
                    .await
            }
        }
    }

    async fn create(
        &self,
        fragment: Fragment<K::Draft>,
        embedding: Vec<f32>,
        contribution: &Contribution,
        product_id: Uuid,
        tokens: i64,
    ) -> Result<AggregateOutcome, PipelineError> {
        let cluster = Cluster {
            id: Uuid::new_v4(),
            product_id,
            draft: fragment.draft,
            embedding,
            stats: ClusterStats::seed(contribution),
        };

        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        self.kind.delete_fragment(&mut *tx, fragment.id).await?;
        self.kind
            .create(&mut *tx, &cluster, Utc::now(), fragment.feedback_id)
            .await?;
        clank_db::add_feedback_tokens(&mut *tx, fragment.feedback_id, tokens).await?;
        tx.commit().await.map_err(DbError::from)?;

        tracing::info!(
            kind = self.kind.name(),
            partial_id = %fragment.id,
            cluster_id = %cluster.id,
            tokens,
            "created a new cluster"
        );

        Ok(AggregateOutcome::Created {
            cluster_id: cluster.id,
            tokens,
        })
    }

    async fn merge(
        &self,
        fragment: &Fragment<K::Draft>,
        target_id: Uuid,
        contribution: &Contribution,
        tokens: i64,
    ) -> Result<AggregateOutcome, PipelineError> {
        match self
            .merge_locked(fragment, target_id, contribution, tokens)
            .await
        {
            Err(PipelineError::Db(e)) if e.is_unique_violation() => {
                tracing::error!(
                    kind = self.kind.name(),
                    partial_id = %fragment.id,
                    feedback_id = %fragment.feedback_id,
                    cluster_id = %target_id,
                    error = %e,
                    "feedback already counted in this cluster, discarding partial"
                );

                let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
                self.kind.delete_fragment(&mut *conn, fragment.id).await?;

                Ok(AggregateOutcome::Discarded)
            }
            other => other,
        }
    }

    async fn merge_locked(
        &self,
        fragment: &Fragment<K::Draft>,
        target_id: Uuid,
        contribution: &Contribution,
        mut tokens: i64,
    ) -> Result<AggregateOutcome, PipelineError> {
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;

        let Some(mut cluster) = self.kind.lock(&mut *tx, target_id).await? else {
            return Err(PipelineError::ClusterVanished {
                kind: self.kind.name(),
                id: target_id,
            });
        };

        let (merged, usage) = self
            .breaker
            .guard(self.kind.merge(&self.engine, &fragment.draft, &cluster.draft))
            .await?;
        tokens += usage.total();

        let embedding = self
            .breaker
            .guard(self.engine.compute_embedding(merged.description()))
            .await?;
        tokens += embedding.usage.total();

        cluster.draft = merged;
        cluster.embedding = embedding.embedding;
        cluster.stats.absorb(contribution, Utc::now());

        self.kind
            .update(&mut *tx, &cluster, fragment.feedback_id)
            .await?;
        self.kind.delete_fragment(&mut *tx, fragment.id).await?;
        clank_db::add_feedback_tokens(&mut *tx, fragment.feedback_id, tokens).await?;
        tx.commit().await.map_err(DbError::from)?;

        tracing::info!(
            kind = self.kind.name(),
            partial_id = %fragment.id,
            cluster_id = %cluster.id,
            customers = cluster.stats.customers,
            tokens,
            "merged 2 clusters"
        );

        Ok(AggregateOutcome::Merged {
            cluster_id: cluster.id,
            tokens,
        })
    }

    fn skipped(&self, partial_id: Uuid, reason: SkipReason) -> AggregateOutcome {
        tracing::debug!(
            kind = self.kind.name(),
            partial_id = %partial_id,
            reason = %reason,
            "skipping partial"
        );
        AggregateOutcome::Skipped(reason)
    }
}

fn contribution<D>(fragment: &Fragment<D>, feedback: &FeedbackRow) -> Contribution {
    Contribution {
        source: feedback.source.clone(),
        label: fragment.label.clone(),
        category: fragment.category.clone(),
        release: feedback.release.clone(),
        posted_at: feedback.posted_at,
    }
}
