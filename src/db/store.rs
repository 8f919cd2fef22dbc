//! Store ports used by the worker, with their Postgres implementation.
//!
//! The worker only sees these traits, so it runs unchanged against a test
//! double or against Postgres shared by several worker processes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::{categories, jobs, transactions, StoreError};
use crate::models::category::{Category, CategorySource};
use crate::models::job::{Job, JobPayload};
use crate::models::transaction::NewTransaction;

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn enqueue(&self, owner: &str, kind: &str, payload: &JobPayload) -> Result<Uuid, StoreError>;
    async fn claim_pending(&self, max_count: i64) -> Result<Vec<Job>, StoreError>;
    async fn recover_stuck(&self, threshold_minutes: i32) -> Result<Vec<Uuid>, StoreError>;
    async fn requeue_failed(&self, max_retries: i32, max_batch: i64) -> Result<Vec<Uuid>, StoreError>;
    /// Finalize under the claim identified by `claimed_at`; `false` if that claim was lost.
    async fn complete(
        &self,
        job_id: Uuid,
        claimed_at: Option<DateTime<Utc>>,
        result: &serde_json::Value,
    ) -> Result<bool, StoreError>;
    async fn fail(&self, job_id: Uuid, claimed_at: Option<DateTime<Utc>>, error: &str) -> Result<bool, StoreError>;
    async fn processing_count(&self) -> Result<i64, StoreError>;
    async fn get_for_owner(&self, job_id: Uuid, owner: &str) -> Result<Option<Job>, StoreError>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// `true` if inserted, `false` if the fingerprint already existed.
    async fn insert_if_absent(&self, tx: &NewTransaction) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait CategoryStore: Send + Sync {
    async fn owner_override(&self, owner: &str, merchant: &str) -> Result<Option<Category>, StoreError>;
    async fn global_lookup(&self, merchant: &str) -> Result<Option<Category>, StoreError>;
    async fn global_store(&self, merchant: &str, category: Category, source: CategorySource) -> Result<(), StoreError>;
}

/// All store ports backed by one Postgres pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn enqueue(&self, owner: &str, kind: &str, payload: &JobPayload) -> Result<Uuid, StoreError> {
        jobs::enqueue(&self.pool, owner, kind, payload).await
    }

    async fn claim_pending(&self, max_count: i64) -> Result<Vec<Job>, StoreError> {
        jobs::claim_pending(&self.pool, max_count).await
    }

    async fn recover_stuck(&self, threshold_minutes: i32) -> Result<Vec<Uuid>, StoreError> {
        jobs::recover_stuck(&self.pool, threshold_minutes).await
    }

    async fn requeue_failed(&self, max_retries: i32, max_batch: i64) -> Result<Vec<Uuid>, StoreError> {
        jobs::requeue_failed(&self.pool, max_retries, max_batch).await
    }

    async fn complete(
        &self,
        job_id: Uuid,
        claimed_at: Option<DateTime<Utc>>,
        result: &serde_json::Value,
    ) -> Result<bool, StoreError> {
        jobs::complete(&self.pool, job_id, claimed_at, result).await
    }

    async fn fail(&self, job_id: Uuid, claimed_at: Option<DateTime<Utc>>, error: &str) -> Result<bool, StoreError> {
        jobs::fail(&self.pool, job_id, claimed_at, error).await
    }

    async fn processing_count(&self) -> Result<i64, StoreError> {
        jobs::processing_count(&self.pool).await
    }

    async fn get_for_owner(&self, job_id: Uuid, owner: &str) -> Result<Option<Job>, StoreError> {
        jobs::get_for_owner(&self.pool, job_id, owner).await
    }
}

#[async_trait]
impl TransactionStore for PgStore {
    async fn insert_if_absent(&self, tx: &NewTransaction) -> Result<bool, StoreError> {
        transactions::insert_if_absent(&self.pool, tx).await
    }
}

#[async_trait]
impl CategoryStore for PgStore {
    async fn owner_override(&self, owner: &str, merchant: &str) -> Result<Option<Category>, StoreError> {
        categories::owner_override(&self.pool, owner, merchant).await
    }

    async fn global_lookup(&self, merchant: &str) -> Result<Option<Category>, StoreError> {
        categories::global_lookup(&self.pool, merchant).await
    }

    async fn global_store(&self, merchant: &str, category: Category, source: CategorySource) -> Result<(), StoreError> {
        categories::global_store(&self.pool, merchant, category, source).await
    }
}
