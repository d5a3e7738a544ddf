use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clank_db::{DbError, NewSuggestion, PartialSuggestionRow, SuggestionRow, SuggestionUpdate};
use clank_engine::{EngineClient, EngineError, Similarity, SuggestionDraft, Usage};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::{Cluster, ClusterKind, Draft, Fragment, SIMILARITY_THRESHOLD, SIMILAR_LIMIT};

impl Draft for SuggestionDraft {
    fn description(&self) -> &str {
        &self.description
    }
}

/// Aggregates `partial_suggestions` into `suggestions`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuggestionKind;

fn fragment(row: PartialSuggestionRow) -> Fragment<SuggestionDraft> {
    Fragment {
        id: row.id,
        feedback_id: row.feedback_id,
        draft: SuggestionDraft {
            title: row.title,
            description: row.description,
            reason: row.reason,
        },
        label: row.importance,
        category: row.category,
        created_at: row.created_at,
    }
}

fn cluster(row: SuggestionRow) -> Cluster<SuggestionDraft> {
    let stats = row.stats();
    Cluster {
        id: row.id,
        product_id: row.product_id,
        draft: SuggestionDraft {
            title: row.title,
            description: row.description,
            reason: row.reason,
        },
        embedding: row.embedding.to_vec(),
        stats,
    }
}

#[async_trait]
impl ClusterKind for SuggestionKind {
    type Draft = SuggestionDraft;

    fn name(&self) -> &'static str {
        "suggestion"
    }

    async fn get_fragment(
        &self,
        pool: &PgPool,
        id: Uuid,
    ) -> Result<Option<Fragment<SuggestionDraft>>, DbError> {
        Ok(clank_db::get_partial_suggestion(pool, id).await?.map(fragment))
    }

    async fn delete_fragment(&self, conn: &mut PgConnection, id: Uuid) -> Result<(), DbError> {
        clank_db::delete_partial_suggestion(conn, id).await
    }

    async fn list_similar(
        &self,
        pool: &PgPool,
        embedding: &[f32],
        product_id: Uuid,
    ) -> Result<Vec<Cluster<SuggestionDraft>>, DbError> {
        let rows = clank_db::list_similar_suggestions(
            pool,
            embedding,
            SIMILARITY_THRESHOLD,
            SIMILAR_LIMIT,
            product_id,
        )
        .await?;
        Ok(rows.into_iter().map(cluster).collect())
    }

    async fn lock(
        &self,
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Cluster<SuggestionDraft>>, DbError> {
        Ok(clank_db::lock_suggestion(conn, id).await?.map(cluster))
    }

    async fn create(
        &self,
        conn: &mut PgConnection,
        cluster: &Cluster<SuggestionDraft>,
        created_at: DateTime<Utc>,
        feedback_id: Uuid,
    ) -> Result<(), DbError> {
        let suggestion = NewSuggestion {
            id: cluster.id,
            product_id: cluster.product_id,
            embedding: cluster.embedding.clone(),
            title: cluster.draft.title.clone(),
            description: cluster.draft.description.clone(),
            reason: cluster.draft.reason.clone(),
            stats: cluster.stats.clone(),
            created_at,
        };
        clank_db::create_suggestion(conn, &suggestion, feedback_id).await?;
        Ok(())
    }

    async fn update(
        &self,
        conn: &mut PgConnection,
        cluster: &Cluster<SuggestionDraft>,
        feedback_id: Uuid,
    ) -> Result<(), DbError> {
        let update = SuggestionUpdate {
            title: cluster.draft.title.clone(),
            description: cluster.draft.description.clone(),
            reason: cluster.draft.reason.clone(),
            embedding: cluster.embedding.clone(),
            stats: cluster.stats.clone(),
        };
        clank_db::update_aggregated_suggestion(conn, cluster.id, &update, feedback_id).await
    }

    async fn rank(
        &self,
        engine: &EngineClient,
        description: &str,
        options: &[&str],
    ) -> Result<Similarity, EngineError> {
        engine.similar_suggestion(description, options).await
    }

    async fn merge(
        &self,
        engine: &EngineClient,
        fragment: &SuggestionDraft,
        cluster: &SuggestionDraft,
    ) -> Result<(SuggestionDraft, Usage), EngineError> {
        let merged = engine.merge_suggestions(fragment, cluster).await?;
        Ok((merged.suggestion, merged.usage))
    }
}
