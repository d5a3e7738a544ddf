//! Database operations for `organizations` and `products`.

use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `organizations` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OrganizationRow {
    pub id: Uuid,
    pub name: String,
    pub capacity_included: i64,
    pub capacity_extra: i64,
    pub usage_value: i64,
    pub usage_last_computed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl OrganizationRow {
    /// Remaining AI budget. Never negative.
    #[must_use]
    pub fn usage_left(&self) -> i64 {
        clank_core::usage_left(self.capacity_included, self.capacity_extra, self.usage_value)
    }
}

/// A row from the `products` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProductRow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    /// Language feedback is translated into before extraction.
    pub language: String,
    /// Free-text product description handed to the engine.
    pub context: String,
    pub categories: Vec<String>,
    pub release: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewOrganization<'a> {
    pub name: &'a str,
    pub capacity_included: i64,
    pub capacity_extra: i64,
    pub usage_value: i64,
}

#[derive(Debug, Clone)]
pub struct NewProduct<'a> {
    pub organization_id: Uuid,
    pub name: &'a str,
    pub language: &'a str,
    pub context: &'a str,
    pub categories: &'a [String],
    pub release: &'a str,
}

const ORGANIZATION_COLUMNS: &str = "id, name, capacity_included, capacity_extra, usage_value, \
                                    usage_last_computed_at, created_at, deleted_at";

const PRODUCT_COLUMNS: &str =
    "id, organization_id, name, language, context, categories, release, created_at, deleted_at";

// ---------------------------------------------------------------------------
// organizations operations
// ---------------------------------------------------------------------------

/// Inserts an organization with a Rust-generated id.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn insert_organization(
    pool: &PgPool,
    org: &NewOrganization<'_>,
) -> Result<OrganizationRow, DbError> {
    let row = sqlx::query_as::<_, OrganizationRow>(&format!(
        "INSERT INTO organizations (id, name, capacity_included, capacity_extra, usage_value) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING {ORGANIZATION_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(org.name)
    .bind(org.capacity_included)
    .bind(org.capacity_extra)
    .bind(org.usage_value)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetches an organization by id, including soft-deleted ones.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_organization<'e, E>(
    executor: E,
    id: Uuid,
) -> Result<Option<OrganizationRow>, DbError>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, OrganizationRow>(&format!(
        "SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(row)
}

// ---------------------------------------------------------------------------
// products operations
// ---------------------------------------------------------------------------

/// Inserts a product with a Rust-generated id.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails (including an unknown
/// `organization_id`).
pub async fn insert_product(pool: &PgPool, product: &NewProduct<'_>) -> Result<ProductRow, DbError> {
    let row = sqlx::query_as::<_, ProductRow>(&format!(
        "INSERT INTO products (id, organization_id, name, language, context, categories, release) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING {PRODUCT_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(product.organization_id)
    .bind(product.name)
    .bind(product.language)
    .bind(product.context)
    .bind(product.categories)
    .bind(product.release)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetches a product by id, including soft-deleted ones.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_product<'e, E>(executor: E, id: Uuid) -> Result<Option<ProductRow>, DbError>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, ProductRow>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(row)
}

/// Sets `deleted_at = NOW()` on a live product.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no live product has this id, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn soft_delete_product(pool: &PgPool, id: Uuid) -> Result<(), DbError> {
    let result =
        sqlx::query("UPDATE products SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .execute(pool)
            .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}
