use sqlx::PgPool;
use std::str::FromStr;
use tracing::warn;

use crate::db::StoreError;
use crate::models::category::{merchant_key, Category, CategorySource};

fn parse_category(merchant: &str, raw: String) -> Option<Category> {
    match Category::from_str(&raw) {
        Ok(c) => Some(c),
        Err(_) => {
            warn!(merchant = %merchant, category = %raw, "Ignoring unknown stored category");
            None
        }
    }
}

/// Owner-specific category override (case-insensitive on merchant name).
pub async fn owner_override(pool: &PgPool, owner: &str, merchant: &str) -> Result<Option<Category>, StoreError> {
    let raw: Option<String> = sqlx::query_scalar(
        "SELECT category FROM merchant_category_overrides WHERE owner = $1 AND merchant_key = $2",
    )
    .bind(owner)
    .bind(merchant_key(merchant))
    .fetch_optional(pool)
    .await?;

    Ok(raw.and_then(|r| parse_category(merchant, r)))
}

/// Shared cache entry (case-insensitive on merchant name).
pub async fn global_lookup(pool: &PgPool, merchant: &str) -> Result<Option<Category>, StoreError> {
    let raw: Option<String> =
        sqlx::query_scalar("SELECT category FROM merchant_categories WHERE merchant_key = $1")
            .bind(merchant_key(merchant))
            .fetch_optional(pool)
            .await?;

    Ok(raw.and_then(|r| parse_category(merchant, r)))
}

/// Write a discovered mapping into the shared cache. Manual entries are never
/// overwritten.
pub async fn global_store(
    pool: &PgPool,
    merchant: &str,
    category: Category,
    source: CategorySource,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO merchant_categories (merchant_key, merchant_name, category, source)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (merchant_key) DO UPDATE
        SET category = EXCLUDED.category,
            source = EXCLUDED.source,
            updated_at = NOW()
        WHERE merchant_categories.source <> 'manual'
        "#,
    )
    .bind(merchant_key(merchant))
    .bind(merchant.trim())
    .bind(category.as_ref())
    .bind(source.as_ref())
    .execute(pool)
    .await?;

    Ok(())
}

/// Administrative write of an owner's correction.
pub async fn set_owner_override(
    pool: &PgPool,
    owner: &str,
    merchant: &str,
    category: Category,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO merchant_category_overrides (owner, merchant_key, category)
        VALUES ($1, $2, $3)
        ON CONFLICT (owner, merchant_key) DO UPDATE
        SET category = EXCLUDED.category, updated_at = NOW()
        "#,
    )
    .bind(owner)
    .bind(merchant_key(merchant))
    .bind(category.as_ref())
    .execute(pool)
    .await?;

    Ok(())
}
