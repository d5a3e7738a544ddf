//! Database operations for `feedback`.
//!
//! Feedback rows are written by the collectors and the translator; this
//! crate's pipeline only ever touches `tokens` and `processed_at`.

use chrono::{DateTime, Utc};
use clank_core::{FeedbackCustomer, FeedbackMetadata};
use sha2::{Digest, Sha256};
use sqlx::{types::Json, PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

use crate::pagination::{page_from_keyed_rows, Cursor, Page};
use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `feedback` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FeedbackRow {
    pub id: Uuid,
    pub product_id: Uuid,
    /// Hex SHA-256 of source, customer name and content; deduplicates
    /// collector re-runs per product.
    pub hash: String,
    pub source: String,
    pub customer: Json<FeedbackCustomer>,
    pub content: String,
    pub language: String,
    pub translation: String,
    pub release: String,
    pub metadata: Json<FeedbackMetadata>,
    /// Accumulated engine token cost.
    pub tokens: i64,
    pub posted_at: DateTime<Utc>,
    pub collected_at: DateTime<Utc>,
    pub translated_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewFeedback<'a> {
    pub product_id: Uuid,
    pub source: &'a str,
    pub customer: &'a FeedbackCustomer,
    pub content: &'a str,
    pub language: &'a str,
    pub translation: &'a str,
    pub release: &'a str,
    pub metadata: &'a FeedbackMetadata,
    pub posted_at: DateTime<Utc>,
    pub translated_at: Option<DateTime<Utc>>,
}

const FEEDBACK_COLUMNS: &str = "id, product_id, hash, source, customer, content, language, \
                                translation, release, metadata, tokens, posted_at, \
                                collected_at, translated_at, processed_at";

#[must_use]
pub fn feedback_hash(source: &str, customer_name: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(customer_name.as_bytes());
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// feedback operations
// ---------------------------------------------------------------------------

/// Inserts a feedback row with a Rust-generated id and computed hash.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails, including a duplicate
/// `(product_id, hash)`.
pub async fn insert_feedback(pool: &PgPool, new: &NewFeedback<'_>) -> Result<FeedbackRow, DbError> {
    let hash = feedback_hash(new.source, &new.customer.name, new.content);

    let row = sqlx::query_as::<_, FeedbackRow>(&format!(
        "INSERT INTO feedback \
             (id, product_id, hash, source, customer, content, language, translation, release, \
              metadata, posted_at, translated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
         RETURNING {FEEDBACK_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(new.product_id)
    .bind(hash)
    .bind(new.source)
    .bind(Json(new.customer))
    .bind(new.content)
    .bind(new.language)
    .bind(new.translation)
    .bind(new.release)
    .bind(Json(new.metadata))
    .bind(new.posted_at)
    .bind(new.translated_at)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_feedback<'e, E>(executor: E, id: Uuid) -> Result<Option<FeedbackRow>, DbError>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, FeedbackRow>(&format!(
        "SELECT {FEEDBACK_COLUMNS} FROM feedback WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(row)
}

/// Re-reads a feedback row under `FOR NO KEY UPDATE`.
///
/// Must run inside a transaction for the lock to outlive the statement.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the row is gone, or [`DbError::Sqlx`]
/// if the query fails.
pub async fn lock_feedback(conn: &mut PgConnection, id: Uuid) -> Result<FeedbackRow, DbError> {
    sqlx::query_as::<_, FeedbackRow>(&format!(
        "SELECT {FEEDBACK_COLUMNS} FROM feedback WHERE id = $1 FOR NO KEY UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(DbError::NotFound)
}

/// Locks the feedback row and adds `tokens` to its running total.
///
/// Returns the new total.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the row is gone, or [`DbError::Sqlx`]
/// if either statement fails.
pub async fn add_feedback_tokens(
    conn: &mut PgConnection,
    id: Uuid,
    tokens: i64,
) -> Result<i64, DbError> {
    lock_feedback(&mut *conn, id).await?;

    let total = sqlx::query_scalar::<_, i64>(
        "UPDATE feedback SET tokens = tokens + $2 WHERE id = $1 RETURNING tokens",
    )
    .bind(id)
    .bind(tokens)
    .fetch_one(&mut *conn)
    .await?;

    Ok(total)
}

/// Adds `tokens` and stamps `processed_at`, once.
///
/// # Errors
///
/// Returns [`DbError::UnexpectedEffect`] if the feedback does not exist or
/// was already processed, or [`DbError::Sqlx`] if the update fails.
pub async fn mark_feedback_processed<'e, E>(
    executor: E,
    id: Uuid,
    tokens: i64,
    processed_at: DateTime<Utc>,
) -> Result<(), DbError>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        "UPDATE feedback SET tokens = tokens + $2, processed_at = $3 \
         WHERE id = $1 AND processed_at IS NULL",
    )
    .bind(id)
    .bind(tokens)
    .bind(processed_at)
    .execute(executor)
    .await?;

    crate::expect_one("mark feedback processed", result.rows_affected())
}

/// Lists ids of translated feedback that has not been processed yet, in
/// `(translated_at, id)` order, starting after `after`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_unprocessed_feedback_ids(
    pool: &PgPool,
    after: Option<Cursor>,
    limit: i64,
) -> Result<Page<Uuid>, DbError> {
    let rows = sqlx::query_as::<_, (DateTime<Utc>, Uuid)>(
        "SELECT translated_at, id FROM feedback \
         WHERE processed_at IS NULL AND translated_at IS NOT NULL \
           AND ($1::timestamptz IS NULL OR (translated_at, id) > ($1, $2)) \
         ORDER BY translated_at, id \
         LIMIT $3",
    )
    .bind(after.map(|c| c.at))
    .bind(after.map(|c| c.id))
    .bind(limit + 1)
    .fetch_all(pool)
    .await?;

    Ok(page_from_keyed_rows(rows, limit))
}
