use sqlx::PgPool;

use crate::db::StoreError;
use crate::models::transaction::NewTransaction;

/// Insert a transaction keyed by its fingerprint.
///
/// Returns `true` when a row was written and `false` when the fingerprint
/// already existed (a duplicate, not an error).
pub async fn insert_if_absent(pool: &PgPool, tx: &NewTransaction) -> Result<bool, StoreError> {
    let inserted: Option<String> = sqlx::query_scalar(
        r#"
        INSERT INTO transactions
            (fingerprint, owner, merchant_name, transaction_date, amount, rewards, category, job_id)
        VALUES ($1, $2, $3, $4, $5::float8::numeric(12, 2), $6::float8::numeric(12, 4), $7, $8)
        ON CONFLICT (fingerprint) DO NOTHING
        RETURNING fingerprint
        "#,
    )
    .bind(&tx.fingerprint)
    .bind(&tx.owner)
    .bind(&tx.merchant_name)
    .bind(tx.date)
    .bind(tx.amount)
    .bind(tx.rewards)
    .bind(tx.category.map(|c| c.as_ref().to_string()))
    .bind(tx.job_id)
    .fetch_optional(pool)
    .await?;

    Ok(inserted.is_some())
}

/// Number of stored transactions for an owner.
pub async fn count_for_owner(pool: &PgPool, owner: &str) -> Result<i64, StoreError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE owner = $1")
        .bind(owner)
        .fetch_one(pool)
        .await?;
    Ok(count)
}
