use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clank_db::{DbError, IssueRow, IssueUpdate, NewIssue, PartialIssueRow};
use clank_engine::{EngineClient, EngineError, IssueDraft, Similarity, Usage};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::{Cluster, ClusterKind, Draft, Fragment, SIMILARITY_THRESHOLD, SIMILAR_LIMIT};

impl Draft for IssueDraft {
    fn description(&self) -> &str {
        &self.description
    }
}

/// Aggregates `partial_issues` into `issues`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IssueKind;

fn fragment(row: PartialIssueRow) -> Fragment<IssueDraft> {
    Fragment {
        id: row.id,
        feedback_id: row.feedback_id,
        draft: IssueDraft {
            title: row.title,
            description: row.description,
            steps: row.steps,
        },
        label: row.severity,
        category: row.category,
        created_at: row.created_at,
    }
}

fn cluster(row: IssueRow) -> Cluster<IssueDraft> {
    let stats = row.stats();
    Cluster {
        id: row.id,
        product_id: row.product_id,
        draft: IssueDraft {
            title: row.title,
            description: row.description,
            steps: row.steps,
        },
        embedding: row.embedding.to_vec(),
        stats,
    }
}

#[async_trait]
impl ClusterKind for IssueKind {
    type Draft = IssueDraft;

    fn name(&self) -> &'static str {
        "issue"
    }

    async fn get_fragment(
        &self,
        pool: &PgPool,
        id: Uuid,
    ) -> Result<Option<Fragment<IssueDraft>>, DbError> {
        Ok(clank_db::get_partial_issue(pool, id).await?.map(fragment))
    }

    async fn delete_fragment(&self, conn: &mut PgConnection, id: Uuid) -> Result<(), DbError> {
        clank_db::delete_partial_issue(conn, id).await
    }

    async fn list_similar(
        &self,
        pool: &PgPool,
        embedding: &[f32],
        product_id: Uuid,
    ) -> Result<Vec<Cluster<IssueDraft>>, DbError> {
        let rows = clank_db::list_similar_issues(
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
    ) -> Result<Option<Cluster<IssueDraft>>, DbError> {
        Ok(clank_db::lock_issue(conn, id).await?.map(cluster))
    }

    async fn create(
        &self,
        conn: &mut PgConnection,
        cluster: &Cluster<IssueDraft>,
        created_at: DateTime<Utc>,
        feedback_id: Uuid,
    ) -> Result<(), DbError> {
        let issue = NewIssue {
            id: cluster.id,
            product_id: cluster.product_id,
            embedding: cluster.embedding.clone(),
            title: cluster.draft.title.clone(),
            description: cluster.draft.description.clone(),
            steps: cluster.draft.steps.clone(),
            stats: cluster.stats.clone(),
            created_at,
        };
        clank_db::create_issue(conn, &issue, feedback_id).await?;
        Ok(())
    }

    async fn update(
        &self,
        conn: &mut PgConnection,
        cluster: &Cluster<IssueDraft>,
        feedback_id: Uuid,
    ) -> Result<(), DbError> {
        let update = IssueUpdate {
            title: cluster.draft.title.clone(),
            description: cluster.draft.description.clone(),
            steps: cluster.draft.steps.clone(),
            embedding: cluster.embedding.clone(),
            stats: cluster.stats.clone(),
        };
        clank_db::update_aggregated_issue(conn, cluster.id, &update, feedback_id).await
    }

    async fn rank(
        &self,
        engine: &EngineClient,
        description: &str,
        options: &[&str],
    ) -> Result<Similarity, EngineError> {
        engine.similar_issue(description, options).await
    }

    async fn merge(
        &self,
        engine: &EngineClient,
        fragment: &IssueDraft,
        cluster: &IssueDraft,
    ) -> Result<(IssueDraft, Usage), EngineError> {
        let merged = engine.merge_issues(fragment, cluster).await?;
        Ok((merged.issue, merged.usage))
    }
}
