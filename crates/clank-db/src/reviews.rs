//! Database operations for `reviews`: the one-per-feedback sentiment summary
//! written by the processor.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::DbError;

/// A row from the `reviews` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReviewRow {
    pub id: Uuid,
    pub product_id: Uuid,
    pub feedback_id: Uuid,
    pub keywords: Vec<String>,
    pub sentiment: String,
    pub emotions: Vec<String>,
    pub intention: String,
    pub category: String,
    pub quality: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub exported_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewReview {
    pub id: Uuid,
    pub product_id: Uuid,
    pub feedback_id: Uuid,
    pub keywords: Vec<String>,
    pub sentiment: String,
    pub emotions: Vec<String>,
    pub intention: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

const REVIEW_COLUMNS: &str = "id, product_id, feedback_id, keywords, sentiment, emotions, \
                              intention, category, quality, created_at, exported_at";

/// Inserts a review. `quality` and `exported_at` start empty.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails, including when the
/// feedback already has a review.
pub async fn insert_review<'e, E>(executor: E, review: &NewReview) -> Result<ReviewRow, DbError>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, ReviewRow>(&format!(
        "INSERT INTO reviews \
             (id, product_id, feedback_id, keywords, sentiment, emotions, intention, category, \
              created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         RETURNING {REVIEW_COLUMNS}"
    ))
    .bind(review.id)
    .bind(review.product_id)
    .bind(review.feedback_id)
    .bind(&review.keywords)
    .bind(&review.sentiment)
    .bind(&review.emotions)
    .bind(&review.intention)
    .bind(&review.category)
    .bind(review.created_at)
    .fetch_one(executor)
    .await?;

    Ok(row)
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_review_by_feedback_id<'e, E>(
    executor: E,
    feedback_id: Uuid,
) -> Result<Option<ReviewRow>, DbError>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, ReviewRow>(&format!(
        "SELECT {REVIEW_COLUMNS} FROM reviews WHERE feedback_id = $1"
    ))
    .bind(feedback_id)
    .fetch_optional(executor)
    .await?;

    Ok(row)
}
