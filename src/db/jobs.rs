//! Durable job queue on the `jobs` table.
//!
//! Every state transition is a single conditional UPDATE, so concurrent
//! workers (in this process or others) coordinate through Postgres row locks
//! alone.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::str::FromStr;
use uuid::Uuid;

use crate::db::StoreError;
use crate::models::job::{Job, JobPayload, JobStatus};

const JOB_COLUMNS: &str =
    "id, owner, kind, status, payload, result, error, retry_count, created_at, started_at, completed_at";

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    owner: String,
    kind: String,
    status: String,
    payload: serde_json::Value,
    result: Option<serde_json::Value>,
    error: Option<String>,
    retry_count: i32,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::from_str(&row.status).map_err(|_| StoreError::Corrupt {
            id: row.id,
            reason: format!("unknown status '{}'", row.status),
        })?;
        let payload: JobPayload = serde_json::from_value(row.payload).map_err(|e| StoreError::Corrupt {
            id: row.id,
            reason: format!("payload: {}", e),
        })?;

        Ok(Job {
            id: row.id,
            owner: row.owner,
            kind: row.kind,
            status,
            payload,
            result: row.result,
            error: row.error,
            retry_count: row.retry_count,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

fn into_jobs(rows: Vec<JobRow>) -> Result<Vec<Job>, StoreError> {
    let mut jobs = rows.into_iter().map(Job::try_from).collect::<Result<Vec<_>, _>>()?;
    // RETURNING order is unspecified; callers rely on oldest first.
    jobs.sort_by_key(|j| j.created_at);
    Ok(jobs)
}

/// Insert a new pending job.
pub async fn enqueue(pool: &PgPool, owner: &str, kind: &str, payload: &JobPayload) -> Result<Uuid, StoreError> {
    let payload = serde_json::to_value(payload)?;
    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO jobs (id, owner, kind, status, payload)
        VALUES ($1, $2, $3, 'pending', $4)
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(owner)
    .bind(kind)
    .bind(payload)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Atomically move up to `max_count` pending jobs (oldest first) to processing.
///
/// `SKIP LOCKED` lets concurrent claimers pass over rows another transaction
/// is already taking, so no job is handed to two callers.
pub async fn claim_pending(pool: &PgPool, max_count: i64) -> Result<Vec<Job>, StoreError> {
    if max_count <= 0 {
        return Ok(Vec::new());
    }

    let rows: Vec<JobRow> = sqlx::query_as(&format!(
        r#"
        UPDATE jobs
        SET status = 'processing', started_at = NOW(), completed_at = NULL
        WHERE id IN (
            SELECT id FROM jobs
            WHERE status = 'pending'
            ORDER BY created_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
        )
        AND status = 'pending'
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(max_count)
    .fetch_all(pool)
    .await?;

    into_jobs(rows)
}

/// Return jobs stuck in processing longer than `threshold_minutes` to pending.
pub async fn recover_stuck(pool: &PgPool, threshold_minutes: i32) -> Result<Vec<Uuid>, StoreError> {
    let ids: Vec<Uuid> = sqlx::query_scalar(
        r#"
        UPDATE jobs
        SET status = 'pending', started_at = NULL
        WHERE status = 'processing'
          AND started_at < NOW() - make_interval(mins => $1)
        RETURNING id
        "#,
    )
    .bind(threshold_minutes)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

/// Requeue up to `max_batch` failed jobs (oldest first) whose retry count is
/// below `max_retries`, incrementing the count.
pub async fn requeue_failed(pool: &PgPool, max_retries: i32, max_batch: i64) -> Result<Vec<Uuid>, StoreError> {
    if max_batch <= 0 {
        return Ok(Vec::new());
    }

    let ids: Vec<Uuid> = sqlx::query_scalar(
        r#"
        UPDATE jobs
        SET status = 'pending',
            retry_count = retry_count + 1,
            error = NULL,
            started_at = NULL,
            completed_at = NULL
        WHERE id IN (
            SELECT id FROM jobs
            WHERE status = 'failed' AND retry_count < $1
            ORDER BY created_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
        )
        AND status = 'failed'
        RETURNING id
        "#,
    )
    .bind(max_retries)
    .bind(max_batch)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

/// Mark a processing job completed.
///
/// `claimed_at` is the `started_at` the caller's claim returned. Returns
/// `false` if the job is no longer held under that claim: already finalized,
/// or recovered by a sweep and claimed again.
pub async fn complete(
    pool: &PgPool,
    job_id: Uuid,
    claimed_at: Option<DateTime<Utc>>,
    result: &serde_json::Value,
) -> Result<bool, StoreError> {
    let updated = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'completed', result = $3, error = NULL, completed_at = NOW()
        WHERE id = $1 AND status = 'processing' AND started_at IS NOT DISTINCT FROM $2
        "#,
    )
    .bind(job_id)
    .bind(claimed_at)
    .bind(result)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(updated == 1)
}

/// Mark a processing job failed with a human-readable cause. Guarded on the
/// claim like [`complete`].
pub async fn fail(
    pool: &PgPool,
    job_id: Uuid,
    claimed_at: Option<DateTime<Utc>>,
    error: &str,
) -> Result<bool, StoreError> {
    let updated = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'failed', error = $3, result = NULL, completed_at = NOW()
        WHERE id = $1 AND status = 'processing' AND started_at IS NOT DISTINCT FROM $2
        "#,
    )
    .bind(job_id)
    .bind(claimed_at)
    .bind(error)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(updated == 1)
}

/// Number of jobs currently held by any worker.
pub async fn processing_count(pool: &PgPool) -> Result<i64, StoreError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = 'processing'")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Number of jobs waiting to be claimed.
pub async fn pending_count(pool: &PgPool) -> Result<i64, StoreError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = 'pending'")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Fetch a job, visible only to its owner.
pub async fn get_for_owner(pool: &PgPool, job_id: Uuid, owner: &str) -> Result<Option<Job>, StoreError> {
    let row: Option<JobRow> = sqlx::query_as(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1 AND owner = $2"
    ))
    .bind(job_id)
    .bind(owner)
    .fetch_optional(pool)
    .await?;

    row.map(Job::try_from).transpose()
}
