//! Database operations for `breaker_counters`: short-lived shared failure
//! counters keyed by name.
//!
//! An expired row reads as absent and restarts from 1 on the next increment.

use sqlx::PgPool;

use crate::DbError;

/// Returns the live failure count for `key`, or `None` if absent or expired.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_breaker_failures(pool: &PgPool, key: &str) -> Result<Option<i32>, DbError> {
    let failures = sqlx::query_scalar::<_, i32>(
        "SELECT failures FROM breaker_counters WHERE key = $1 AND expires_at > NOW()",
    )
    .bind(key)
    .fetch_optional(pool)
    .await?;

    Ok(failures)
}

/// Atomically increments the counter and pushes its expiry to `NOW() + ttl_secs`.
///
/// Returns the count after the increment.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn increment_breaker_failures(
    pool: &PgPool,
    key: &str,
    ttl_secs: f64,
) -> Result<i32, DbError> {
    let failures = sqlx::query_scalar::<_, i32>(
        "INSERT INTO breaker_counters (key, failures, expires_at) \
         VALUES ($1, 1, NOW() + make_interval(secs => $2)) \
         ON CONFLICT (key) DO UPDATE SET \
             failures = CASE WHEN breaker_counters.expires_at > NOW() \
                             THEN breaker_counters.failures + 1 ELSE 1 END, \
             expires_at = EXCLUDED.expires_at \
         RETURNING failures",
    )
    .bind(key)
    .bind(ttl_secs)
    .fetch_one(pool)
    .await?;

    Ok(failures)
}

/// Overwrites the counter with `failures`, expiring after `ttl_secs`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn set_breaker_failures(
    pool: &PgPool,
    key: &str,
    failures: i32,
    ttl_secs: f64,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO breaker_counters (key, failures, expires_at) \
         VALUES ($1, $2, NOW() + make_interval(secs => $3)) \
         ON CONFLICT (key) DO UPDATE SET \
             failures = EXCLUDED.failures, expires_at = EXCLUDED.expires_at",
    )
    .bind(key)
    .bind(failures)
    .bind(ttl_secs)
    .execute(pool)
    .await?;

    Ok(())
}

/// Removes the counter. Deleting an absent key is not an error.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the delete fails.
pub async fn delete_breaker_counter(pool: &PgPool, key: &str) -> Result<(), DbError> {
    sqlx::query("DELETE FROM breaker_counters WHERE key = $1")
        .bind(key)
        .execute(pool)
        .await?;

    Ok(())
}
