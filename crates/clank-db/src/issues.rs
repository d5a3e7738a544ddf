//! Database operations for `issues`, `issue_feedback` and `partial_issues`.

use chrono::{DateTime, Utc};
use clank_core::{ClusterStats, Tally};
use pgvector::Vector;
use sqlx::{types::Json, PgConnection, PgExecutor, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::pagination::{page_from_keyed_rows, Cursor, Page};
use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `issues` table: a canonical, deduplicated issue cluster.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IssueRow {
    pub id: Uuid,
    pub product_id: Uuid,
    /// Embedding of the current `description`.
    pub embedding: Vector,
    pub sources: Json<Tally>,
    pub title: String,
    pub description: String,
    pub steps: Vec<String>,
    pub severities: Json<Tally>,
    pub priority: i32,
    pub categories: Json<Tally>,
    pub releases: Json<Tally>,
    pub customers: i32,
    pub assignee_id: Option<Uuid>,
    pub quality: Option<i32>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
    pub last_aggregated_at: Option<DateTime<Utc>>,
    pub exported_at: Option<DateTime<Utc>>,
}

impl IssueRow {
    #[must_use]
    pub fn stats(&self) -> ClusterStats {
        ClusterStats {
            sources: self.sources.0.clone(),
            labels: self.severities.0.clone(),
            categories: self.categories.0.clone(),
            releases: self.releases.0.clone(),
            customers: self.customers,
            priority: self.priority,
            first_seen_at: self.first_seen_at,
            last_seen_at: self.last_seen_at,
            last_aggregated_at: self.last_aggregated_at,
        }
    }
}

/// A row from the `partial_issues` table: one not-yet-aggregated extraction.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PartialIssueRow {
    pub id: Uuid,
    pub feedback_id: Uuid,
    pub title: String,
    pub description: String,
    pub steps: Vec<String>,
    pub severity: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPartialIssue {
    pub id: Uuid,
    pub feedback_id: Uuid,
    pub title: String,
    pub description: String,
    pub steps: Vec<String>,
    pub severity: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewIssue {
    pub id: Uuid,
    pub product_id: Uuid,
    pub embedding: Vec<f32>,
    pub title: String,
    pub description: String,
    pub steps: Vec<String>,
    pub stats: ClusterStats,
    pub created_at: DateTime<Utc>,
}

/// Content and statistics rewritten by a merge.
#[derive(Debug, Clone)]
pub struct IssueUpdate {
    pub title: String,
    pub description: String,
    pub steps: Vec<String>,
    pub embedding: Vec<f32>,
    pub stats: ClusterStats,
}

const ISSUE_COLUMNS: &str = "id, product_id, embedding, sources, title, description, steps, \
                             severities, priority, categories, releases, customers, assignee_id, \
                             quality, first_seen_at, last_seen_at, created_at, archived_at, \
                             last_aggregated_at, exported_at";

const PARTIAL_ISSUE_COLUMNS: &str =
    "id, feedback_id, title, description, steps, severity, category, created_at";

// ---------------------------------------------------------------------------
// partial_issues operations
// ---------------------------------------------------------------------------

/// Inserts all partials in one statement. An empty slice is a no-op.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn bulk_create_partial_issues<'e, E>(
    executor: E,
    partials: &[NewPartialIssue],
) -> Result<(), DbError>
where
    E: PgExecutor<'e>,
{
    if partials.is_empty() {
        return Ok(());
    }

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO partial_issues \
             (id, feedback_id, title, description, steps, severity, category, created_at) ",
    );
    builder.push_values(partials, |mut b, p| {
        b.push_bind(p.id)
            .push_bind(p.feedback_id)
            .push_bind(&p.title)
            .push_bind(&p.description)
            .push_bind(&p.steps)
            .push_bind(&p.severity)
            .push_bind(&p.category)
            .push_bind(p.created_at);
    });
    builder.build().execute(executor).await?;

    Ok(())
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_partial_issue<'e, E>(
    executor: E,
    id: Uuid,
) -> Result<Option<PartialIssueRow>, DbError>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, PartialIssueRow>(&format!(
        "SELECT {PARTIAL_ISSUE_COLUMNS} FROM partial_issues WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(row)
}

/// Deletes exactly one partial.
///
/// # Errors
///
/// Returns [`DbError::UnexpectedEffect`] if the partial was already gone,
/// or [`DbError::Sqlx`] if the delete fails.
pub async fn delete_partial_issue<'e, E>(executor: E, id: Uuid) -> Result<(), DbError>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM partial_issues WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await?;

    crate::expect_one("delete partial issue", result.rows_affected())
}

/// Lists partial ids in `(created_at, id)` order, starting after `after`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_partial_issue_ids(
    pool: &PgPool,
    after: Option<Cursor>,
    limit: i64,
) -> Result<Page<Uuid>, DbError> {
    let rows = sqlx::query_as::<_, (DateTime<Utc>, Uuid)>(
        "SELECT created_at, id FROM partial_issues \
         WHERE ($1::timestamptz IS NULL OR (created_at, id) > ($1, $2)) \
         ORDER BY created_at, id \
         LIMIT $3",
    )
    .bind(after.map(|c| c.at))
    .bind(after.map(|c| c.id))
    .bind(limit + 1)
    .fetch_all(pool)
    .await?;

    Ok(page_from_keyed_rows(rows, limit))
}

// ---------------------------------------------------------------------------
// issues operations
// ---------------------------------------------------------------------------

/// Inserts a new issue and links it to the feedback it came from.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if either insert fails.
pub async fn create_issue(
    conn: &mut PgConnection,
    issue: &NewIssue,
    feedback_id: Uuid,
) -> Result<IssueRow, DbError> {
    let stats = &issue.stats;

    let row = sqlx::query_as::<_, IssueRow>(&format!(
        "INSERT INTO issues \
             (id, product_id, embedding, sources, title, description, steps, severities, \
              priority, categories, releases, customers, first_seen_at, last_seen_at, \
              created_at, last_aggregated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
         RETURNING {ISSUE_COLUMNS}"
    ))
    .bind(issue.id)
    .bind(issue.product_id)
    .bind(Vector::from(issue.embedding.clone()))
    .bind(Json(&stats.sources))
    .bind(&issue.title)
    .bind(&issue.description)
    .bind(&issue.steps)
    .bind(Json(&stats.labels))
    .bind(stats.priority)
    .bind(Json(&stats.categories))
    .bind(Json(&stats.releases))
    .bind(stats.customers)
    .bind(stats.first_seen_at)
    .bind(stats.last_seen_at)
    .bind(issue.created_at)
    .bind(stats.last_aggregated_at)
    .fetch_one(&mut *conn)
    .await?;

    link_issue_feedback(&mut *conn, issue.id, feedback_id).await?;

    Ok(row)
}

async fn link_issue_feedback(
    conn: &mut PgConnection,
    issue_id: Uuid,
    feedback_id: Uuid,
) -> Result<(), DbError> {
    sqlx::query("INSERT INTO issue_feedback (issue_id, feedback_id) VALUES ($1, $2)")
        .bind(issue_id)
        .bind(feedback_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_issue<'e, E>(executor: E, id: Uuid) -> Result<Option<IssueRow>, DbError>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, IssueRow>(&format!(
        "SELECT {ISSUE_COLUMNS} FROM issues WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(row)
}

/// Reads an issue under `FOR NO KEY UPDATE NOWAIT`.
///
/// If another transaction holds the row the statement fails at once with
/// SQLSTATE `55P03` (see [`DbError::is_lock_not_available`]).
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails or the lock is taken.
pub async fn lock_issue<'e, E>(executor: E, id: Uuid) -> Result<Option<IssueRow>, DbError>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, IssueRow>(&format!(
        "SELECT {ISSUE_COLUMNS} FROM issues WHERE id = $1 FOR NO KEY UPDATE NOWAIT"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(row)
}

/// Returns up to `limit` issues of the product whose cosine similarity to
/// `embedding` is at least `threshold`, most similar first.
///
/// The top `limit` are picked before the threshold is applied.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_similar_issues<'e, E>(
    executor: E,
    embedding: &[f32],
    threshold: f64,
    limit: i64,
    product_id: Uuid,
) -> Result<Vec<IssueRow>, DbError>
where
    E: PgExecutor<'e>,
{
    let rows = sqlx::query_as::<_, IssueRow>(&format!(
        "SELECT {ISSUE_COLUMNS} FROM ( \
             SELECT *, 1 - (embedding <=> $1) AS score \
             FROM issues \
             WHERE product_id = $2 \
             ORDER BY score DESC \
             LIMIT $3 \
         ) AS nearest \
         WHERE score >= $4 \
         ORDER BY score DESC"
    ))
    .bind(Vector::from(embedding.to_vec()))
    .bind(product_id)
    .bind(limit)
    .bind(threshold)
    .fetch_all(executor)
    .await?;

    Ok(rows)
}

/// Rewrites a merged issue and links the contributing feedback.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update or link insert fails. A link that
/// already exists surfaces as a unique violation
/// (see [`DbError::is_unique_violation`]).
pub async fn update_aggregated_issue(
    conn: &mut PgConnection,
    id: Uuid,
    update: &IssueUpdate,
    feedback_id: Uuid,
) -> Result<(), DbError> {
    let stats = &update.stats;

    let result = sqlx::query(
        "UPDATE issues SET \
             embedding = $2, sources = $3, title = $4, description = $5, steps = $6, \
             severities = $7, priority = $8, categories = $9, releases = $10, customers = $11, \
             first_seen_at = $12, last_seen_at = $13, last_aggregated_at = $14 \
         WHERE id = $1",
    )
    .bind(id)
    .bind(Vector::from(update.embedding.clone()))
    .bind(Json(&stats.sources))
    .bind(&update.title)
    .bind(&update.description)
    .bind(&update.steps)
    .bind(Json(&stats.labels))
    .bind(stats.priority)
    .bind(Json(&stats.categories))
    .bind(Json(&stats.releases))
    .bind(stats.customers)
    .bind(stats.first_seen_at)
    .bind(stats.last_seen_at)
    .bind(stats.last_aggregated_at)
    .execute(&mut *conn)
    .await?;

    crate::expect_one("update aggregated issue", result.rows_affected())?;

    link_issue_feedback(&mut *conn, id, feedback_id).await
}
