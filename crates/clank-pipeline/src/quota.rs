//! Tenant resolution and the usage-quota gate that precede any paid engine
//! call.

use clank_db::{DbError, OrganizationRow, ProductRow};
use sqlx::PgPool;
use uuid::Uuid;

use crate::outcome::SkipReason;

/// The live product a piece of feedback belongs to, and its organization.
#[derive(Debug, Clone)]
pub struct Tenant {
    pub product: ProductRow,
    pub organization: OrganizationRow,
}

/// Loads the product and organization and checks they may spend tokens.
///
/// Returns `Ok(Err(reason))` when the work must be skipped: the product or
/// organization is missing or soft-deleted, or the organization has less than
/// one unit of usage left.
///
/// # Errors
///
/// Returns [`DbError`] if a lookup fails.
pub async fn check(pool: &PgPool, product_id: Uuid) -> Result<Result<Tenant, SkipReason>, DbError> {
    let Some(product) = clank_db::get_product(pool, product_id).await? else {
        return Ok(Err(SkipReason::ProductNotFound));
    };
    if product.deleted_at.is_some() {
        return Ok(Err(SkipReason::ProductDeleted));
    }

    let Some(organization) = clank_db::get_organization(pool, product.organization_id).await? else {
        return Ok(Err(SkipReason::OrganizationNotFound));
    };
    if organization.deleted_at.is_some() {
        return Ok(Err(SkipReason::OrganizationDeleted));
    }

    if organization.usage_left() < 1 {
        return Ok(Err(SkipReason::QuotaExhausted));
    }

    Ok(Ok(Tenant {
        product,
        organization,
    }))
}
