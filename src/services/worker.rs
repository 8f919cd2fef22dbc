//! The job worker.
//!
//! [`Worker::run_once`] is the single trigger point. It may be called from a
//! timer, an HTTP request or right after an enqueue, and from several
//! processes at once: jobs are handed out only through the store's atomic
//! claim, and each invocation finalizes exactly the jobs it claimed.

use base64::Engine;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::store::{JobStore, TransactionStore};
use crate::db::StoreError;
use crate::models::job::{Job, JobPayload, JobResult, VIDEO_EXTRACT};
use crate::models::transaction::{NewTransaction, StoredTransaction, TransactionCandidate};
use crate::services::categorize::CategoryResolver;
use crate::services::dates::normalize_date;
use crate::services::encryption::{EncryptionError, FrameCipher};
use crate::services::extraction::{ExtractionError, Extractor};
use crate::services::fingerprint::fingerprint;
use crate::services::storage::{BlobStore, StorageError};

/// Throttling and recovery knobs.
///
/// Concurrency is bounded, not single-flight: up to `max_concurrent_jobs`
/// jobs may be processing system-wide. Setting it to 1 serializes the worker.
///
/// `job_timeout` must stay below `stuck_job_minutes`, otherwise a live job can
/// be swept and claimed a second time while its first run is still going.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub max_concurrent_jobs: i64,
    pub stuck_job_minutes: i32,
    pub max_job_retries: i32,
    pub requeue_batch_size: i64,
    /// Wall-clock budget for one job, download through finalization.
    pub job_timeout: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            stuck_job_minutes: 5,
            max_job_retries: 3,
            requeue_batch_size: 5,
            job_timeout: Duration::from_secs(240),
        }
    }
}

/// What one invocation did.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunSummary {
    /// Failed jobs put back to pending by the bounded retry.
    pub requeued: usize,
    /// Stuck jobs put back to pending by the staleness sweep.
    pub recovered: usize,
    #[serde(flatten)]
    pub outcome: RunOutcome,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// No pending jobs.
    Idle,
    /// Every slot is taken by jobs already processing.
    AtCapacity { processing: i64 },
    Processed {
        job_ids: Vec<Uuid>,
        completed: usize,
        failed: usize,
        /// Jobs whose claim was taken over by a recovery sweep before they
        /// finished; their outcome was discarded.
        superseded: usize,
        duration_ms: u64,
    },
}

/// How one claimed job ended for this invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finalized {
    Completed,
    Failed,
    Superseded,
}

/// Why a job failed; the message becomes the job's `error`.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Unsupported job kind '{0}'")]
    UnsupportedKind(String),

    #[error("Invalid job payload: {0}")]
    Payload(String),

    #[error("Frame download failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Frame decryption failed: {0}")]
    Decrypt(#[from] EncryptionError),

    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Transaction store failed: {0}")]
    Store(#[from] StoreError),

    #[error("Job timed out after {0}s")]
    TimedOut(u64),
}

pub struct Worker {
    jobs: Arc<dyn JobStore>,
    transactions: Arc<dyn TransactionStore>,
    resolver: CategoryResolver,
    extractor: Extractor,
    blobs: Arc<dyn BlobStore>,
    cipher: Arc<FrameCipher>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        transactions: Arc<dyn TransactionStore>,
        resolver: CategoryResolver,
        extractor: Extractor,
        blobs: Arc<dyn BlobStore>,
        cipher: Arc<FrameCipher>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            jobs,
            transactions,
            resolver,
            extractor,
            blobs,
            cipher,
            settings,
        }
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Reconcile, claim what capacity allows and process the claimed jobs.
    pub async fn run_once(&self) -> Result<RunSummary, StoreError> {
        let started = Instant::now();

        let requeued = self
            .jobs
            .requeue_failed(self.settings.max_job_retries, self.settings.requeue_batch_size)
            .await?;
        if !requeued.is_empty() {
            info!(count = requeued.len(), job_ids = ?requeued, "Requeued failed jobs for retry");
            metrics::counter!("jobs_requeued_total").increment(requeued.len() as u64);
        }

        let recovered = self.jobs.recover_stuck(self.settings.stuck_job_minutes).await?;
        if !recovered.is_empty() {
            warn!(count = recovered.len(), job_ids = ?recovered, "Recovered stuck jobs");
            metrics::counter!("jobs_recovered_total").increment(recovered.len() as u64);
        }

        let summary = |outcome| RunSummary {
            requeued: requeued.len(),
            recovered: recovered.len(),
            outcome,
        };

        let processing = self.jobs.processing_count().await?;
        let slots = self.settings.max_concurrent_jobs - processing;
        if slots <= 0 {
            debug!(processing, "Worker at capacity");
            return Ok(summary(RunOutcome::AtCapacity { processing }));
        }

        let claimed = self.jobs.claim_pending(slots).await?;
        if claimed.is_empty() {
            return Ok(summary(RunOutcome::Idle));
        }

        let job_ids: Vec<Uuid> = claimed.iter().map(|j| j.id).collect();
        info!(count = claimed.len(), job_ids = ?job_ids, "Claimed jobs");

        let results = join_all(claimed.into_iter().map(|job| self.process_job(job))).await;
        let count = |kind: Finalized| results.iter().filter(|r| **r == kind).count();

        Ok(summary(RunOutcome::Processed {
            job_ids,
            completed: count(Finalized::Completed),
            failed: count(Finalized::Failed),
            superseded: count(Finalized::Superseded),
            duration_ms: started.elapsed().as_millis() as u64,
        }))
    }

    /// Process one claimed job to a terminal state.
    async fn process_job(&self, job: Job) -> Finalized {
        let start = Instant::now();
        info!(
            job_id = %job.id,
            owner = %job.owner,
            frames = job.payload.frame_count(),
            retry_count = job.retry_count,
            "Processing extraction job"
        );

        let mut downloaded = Vec::new();
        let outcome = match tokio::time::timeout(self.settings.job_timeout, self.execute(&job, &mut downloaded)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(JobError::TimedOut(self.settings.job_timeout.as_secs())),
        };
        self.cleanup_blobs(job.id, &downloaded).await;

        metrics::histogram!("extraction_job_seconds").record(start.elapsed().as_secs_f64());

        let outcome = outcome.and_then(|result| {
            let value = serde_json::to_value(&result).map_err(StoreError::from)?;
            Ok((result, value))
        });

        match outcome {
            Ok((result, value)) => match self.jobs.complete(job.id, job.started_at, &value).await {
                Ok(true) => {
                    metrics::counter!("extraction_jobs_completed").increment(1);
                    metrics::counter!("transactions_added_total").increment(result.added as u64);
                    metrics::counter!("transactions_duplicate_total").increment(result.duplicates as u64);
                    info!(
                        job_id = %job.id,
                        extracted = result.extracted,
                        added = result.added,
                        duplicates = result.duplicates,
                        skipped = result.skipped,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Job completed"
                    );
                    Finalized::Completed
                }
                Ok(false) => {
                    warn!(job_id = %job.id, "Job claim was taken over; result discarded");
                    Finalized::Superseded
                }
                Err(e) => {
                    error!(job_id = %job.id, error = %e, "Failed to record job completion");
                    Finalized::Failed
                }
            },
            Err(e) => {
                let message = e.to_string();
                error!(job_id = %job.id, error = %message, "Job failed");
                match self.jobs.fail(job.id, job.started_at, &message).await {
                    Ok(true) => {
                        metrics::counter!("extraction_jobs_failed").increment(1);
                        Finalized::Failed
                    }
                    Ok(false) => {
                        warn!(job_id = %job.id, "Job claim was taken over; failure not recorded");
                        Finalized::Superseded
                    }
                    Err(e) => {
                        error!(job_id = %job.id, error = %e, "Failed to record job failure");
                        Finalized::Failed
                    }
                }
            }
        }
    }

    async fn execute(&self, job: &Job, downloaded: &mut Vec<String>) -> Result<JobResult, JobError> {
        if job.kind != VIDEO_EXTRACT {
            return Err(JobError::UnsupportedKind(job.kind.clone()));
        }

        let frames = self.load_frames(&job.payload, downloaded).await?;
        let candidates = self.extractor.extract(&frames).await?;
        self.store_candidates(job, candidates).await
    }

    /// Resolve the payload to frame bytes. Keys of blobs fetched from storage
    /// are pushed to `downloaded` as they arrive so they get cleaned up even
    /// if a later step fails.
    async fn load_frames(&self, payload: &JobPayload, downloaded: &mut Vec<String>) -> Result<Vec<Vec<u8>>, JobError> {
        match payload {
            JobPayload::Inline { frames } => frames
                .iter()
                .enumerate()
                .map(|(i, f)| {
                    base64::engine::general_purpose::STANDARD
                        .decode(f)
                        .map_err(|e| JobError::Payload(format!("frame {}: {}", i, e)))
                })
                .collect(),
            JobPayload::Stored { blobs } => {
                let mut frames = Vec::with_capacity(blobs.len());
                for blob in blobs {
                    let sealed = self.blobs.get(&blob.key).await?;
                    downloaded.push(blob.key.clone());
                    if sealed.len() as u64 != blob.size {
                        debug!(key = %blob.key, expected = blob.size, actual = sealed.len(), "Blob size differs from reference");
                    }
                    frames.push(self.cipher.open(&blob.key, &sealed)?);
                }
                Ok(frames)
            }
        }
    }

    /// Normalize, fingerprint, categorize and insert each candidate.
    async fn store_candidates(&self, job: &Job, candidates: Vec<TransactionCandidate>) -> Result<JobResult, JobError> {
        let mut result = JobResult {
            extracted: candidates.len(),
            ..JobResult::default()
        };

        for candidate in candidates {
            let date = match normalize_date(&candidate.date) {
                Ok(date) => date.date(),
                Err(e) => {
                    debug!(job_id = %job.id, merchant = %candidate.merchant_name, error = %e, "Skipping candidate");
                    result.skipped += 1;
                    continue;
                }
            };

            let merchant_name = candidate.merchant_name.trim().to_string();
            let tx = NewTransaction {
                fingerprint: fingerprint(&job.owner, &merchant_name, date, candidate.amount, candidate.rewards),
                category: self.resolver.resolve(&job.owner, &merchant_name).await,
                owner: job.owner.clone(),
                merchant_name,
                date,
                amount: candidate.amount,
                rewards: candidate.rewards,
                job_id: job.id,
            };

            let inserted = self.transactions.insert_if_absent(&tx).await?;
            if inserted {
                result.added += 1;
            } else {
                result.duplicates += 1;
            }
            result.transactions.push(StoredTransaction::from_new(&tx, !inserted));
        }

        Ok(result)
    }

    /// Delete fetched blobs. Failures are logged; they never change the job outcome.
    async fn cleanup_blobs(&self, job_id: Uuid, keys: &[String]) {
        for key in keys {
            if let Err(e) = self.blobs.delete(key).await {
                warn!(job_id = %job_id, key = %key, error = %e, "Failed to delete frame blob");
            }
        }
    }
}
