//! In-memory doubles for the worker's ports, plus a harness wiring them up.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use statement_scan::db::store::{CategoryStore, JobStore, TransactionStore};
use statement_scan::db::StoreError;
use statement_scan::models::category::{merchant_key, Category, CategorySource};
use statement_scan::models::job::{Job, JobPayload, JobStatus, VIDEO_EXTRACT};
use statement_scan::models::transaction::NewTransaction;
use statement_scan::services::categorize::CategoryResolver;
use statement_scan::services::encryption::FrameCipher;
use statement_scan::services::extraction::{Extractor, RetryPolicy};
use statement_scan::services::storage::{BlobStore, StorageError};
use statement_scan::services::vision::{VisionError, VisionModel};
use statement_scan::services::worker::{Worker, WorkerSettings};

/// Job queue held in a vector; the mutex makes each transition atomic.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<Vec<Job>>,
}

impl MemoryJobStore {
    /// Insert a job as-is, e.g. one already processing.
    pub fn seed(&self, job: Job) {
        self.jobs.lock().unwrap().push(job);
    }

    pub fn get(&self, id: Uuid) -> Job {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.id == id)
            .cloned()
            .expect("job exists")
    }

    pub fn count_with_status(&self, status: JobStatus) -> usize {
        self.jobs.lock().unwrap().iter().filter(|j| j.status == status).count()
    }

    /// Still processing under the claim that started at `claimed_at`.
    fn held(job: &Job, job_id: Uuid, claimed_at: Option<DateTime<Utc>>) -> bool {
        job.id == job_id && job.status == JobStatus::Processing && job.started_at == claimed_at
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, owner: &str, kind: &str, payload: &JobPayload) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        self.seed(Job {
            id,
            owner: owner.to_string(),
            kind: kind.to_string(),
            status: JobStatus::Pending,
            payload: payload.clone(),
            result: None,
            error: None,
            retry_count: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        });
        Ok(id)
    }

    async fn claim_pending(&self, max_count: i64) -> Result<Vec<Job>, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let mut pending: Vec<&mut Job> = jobs.iter_mut().filter(|j| j.status == JobStatus::Pending).collect();
        pending.sort_by_key(|j| j.created_at);

        let now = Utc::now();
        Ok(pending
            .into_iter()
            .take(max_count.max(0) as usize)
            .map(|job| {
                job.status = JobStatus::Processing;
                job.started_at = Some(now);
                job.completed_at = None;
                job.clone()
            })
            .collect())
    }

    async fn recover_stuck(&self, threshold_minutes: i32) -> Result<Vec<Uuid>, StoreError> {
        let cutoff = Utc::now() - ChronoDuration::minutes(threshold_minutes as i64);
        let mut jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .iter_mut()
            .filter(|j| j.status == JobStatus::Processing && j.started_at.is_some_and(|s| s < cutoff))
            .map(|job| {
                job.status = JobStatus::Pending;
                job.started_at = None;
                job.id
            })
            .collect())
    }

    async fn requeue_failed(&self, max_retries: i32, max_batch: i64) -> Result<Vec<Uuid>, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let mut failed: Vec<&mut Job> = jobs
            .iter_mut()
            .filter(|j| j.status == JobStatus::Failed && j.retry_count < max_retries)
            .collect();
        failed.sort_by_key(|j| j.created_at);

        Ok(failed
            .into_iter()
            .take(max_batch.max(0) as usize)
            .map(|job| {
                job.status = JobStatus::Pending;
                job.retry_count += 1;
                job.error = None;
                job.started_at = None;
                job.completed_at = None;
                job.id
            })
            .collect())
    }

    async fn complete(
        &self,
        job_id: Uuid,
        claimed_at: Option<DateTime<Utc>>,
        result: &serde_json::Value,
    ) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.iter_mut().find(|j| Self::held(j, job_id, claimed_at)) {
            Some(job) => {
                job.status = JobStatus::Completed;
                job.result = Some(result.clone());
                job.error = None;
                job.completed_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn fail(&self, job_id: Uuid, claimed_at: Option<DateTime<Utc>>, error: &str) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.iter_mut().find(|j| Self::held(j, job_id, claimed_at)) {
            Some(job) => {
                job.status = JobStatus::Failed;
                job.result = None;
                job.error = Some(error.to_string());
                job.completed_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn processing_count(&self) -> Result<i64, StoreError> {
        Ok(self.count_with_status(JobStatus::Processing) as i64)
    }

    async fn get_for_owner(&self, job_id: Uuid, owner: &str) -> Result<Option<Job>, StoreError> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.id == job_id && j.owner == owner)
            .cloned())
    }
}

#[derive(Default)]
pub struct MemoryTransactions {
    rows: Mutex<HashMap<String, NewTransaction>>,
}

impl MemoryTransactions {
    pub fn count_for_owner(&self, owner: &str) -> usize {
        self.rows.lock().unwrap().values().filter(|t| t.owner == owner).count()
    }
}

#[async_trait]
impl TransactionStore for MemoryTransactions {
    async fn insert_if_absent(&self, tx: &NewTransaction) -> Result<bool, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(&tx.fingerprint) {
            return Ok(false);
        }
        rows.insert(tx.fingerprint.clone(), tx.clone());
        Ok(true)
    }
}

#[derive(Default)]
pub struct MemoryCategories {
    overrides: Mutex<HashMap<(String, String), Category>>,
    global: Mutex<HashMap<String, (Category, CategorySource)>>,
}

impl MemoryCategories {
    pub fn set_override(&self, owner: &str, merchant: &str, category: Category) {
        self.overrides
            .lock()
            .unwrap()
            .insert((owner.to_string(), merchant_key(merchant)), category);
    }

    pub fn cached(&self, merchant: &str) -> Option<(Category, CategorySource)> {
        self.global.lock().unwrap().get(&merchant_key(merchant)).copied()
    }
}

#[async_trait]
impl CategoryStore for MemoryCategories {
    async fn owner_override(&self, owner: &str, merchant: &str) -> Result<Option<Category>, StoreError> {
        Ok(self
            .overrides
            .lock()
            .unwrap()
            .get(&(owner.to_string(), merchant_key(merchant)))
            .copied())
    }

    async fn global_lookup(&self, merchant: &str) -> Result<Option<Category>, StoreError> {
        Ok(self.cached(merchant).map(|(c, _)| c))
    }

    async fn global_store(&self, merchant: &str, category: Category, source: CategorySource) -> Result<(), StoreError> {
        let mut global = self.global.lock().unwrap();
        let key = merchant_key(merchant);
        if !matches!(global.get(&key), Some((_, CategorySource::Manual))) {
            global.insert(key, (category, source));
        }
        Ok(())
    }
}

/// Blob store that remembers which keys were deleted.
#[derive(Default)]
pub struct MemoryBlobs {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    deleted: Mutex<Vec<String>>,
}

impl MemoryBlobs {
    pub fn put_sealed(&self, cipher: &FrameCipher, key: &str, frame: &[u8]) {
        let sealed = cipher.seal(key, frame).expect("seal frame");
        self.objects.lock().unwrap().insert(key.to_string(), sealed);
    }

    pub fn put_raw(&self, key: &str, bytes: Vec<u8>) {
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
    }

    pub fn deleted(&self) -> Vec<String> {
        let mut keys = self.deleted.lock().unwrap().clone();
        keys.sort();
        keys
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobs {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.objects.lock().unwrap().remove(key);
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

/// Vision model answering by the first frame of each batch.
///
/// Unscripted frames answer with an empty array. The first
/// `rate_limit_first` calls fail with a rate limit regardless of frames.
/// Every call takes at least `latency`.
#[derive(Default)]
pub struct ScriptedVision {
    answers: Mutex<HashMap<Vec<u8>, VecDeque<Result<String, VisionError>>>>,
    rate_limit_first: AtomicUsize,
    calls: AtomicUsize,
    latency_ms: AtomicU64,
}

impl ScriptedVision {
    pub fn answer(&self, first_frame: &[u8], response: &str) {
        self.push(first_frame, Ok(response.to_string()));
    }

    pub fn fail(&self, first_frame: &[u8], error: VisionError) {
        self.push(first_frame, Err(error));
    }

    pub fn rate_limit_first(&self, calls: usize) {
        self.rate_limit_first.store(calls, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn push(&self, first_frame: &[u8], response: Result<String, VisionError>) {
        self.answers
            .lock()
            .unwrap()
            .entry(first_frame.to_vec())
            .or_default()
            .push_back(response);
    }
}

#[async_trait]
impl VisionModel for ScriptedVision {
    async fn analyze(&self, frames: &[Vec<u8>], _prompt: &str) -> Result<String, VisionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if call < self.rate_limit_first.load(Ordering::SeqCst) {
            return Err(VisionError::RateLimited("429 Too Many Requests".to_string()));
        }

        let Some(first) = frames.first() else {
            return Ok("[]".to_string());
        };
        let mut answers = self.answers.lock().unwrap();
        match answers.get_mut(first).and_then(|q| q.pop_front()) {
            Some(response) => response,
            None => Ok("[]".to_string()),
        }
    }
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(2),
    }
}

pub fn test_cipher() -> FrameCipher {
    let key = base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
    FrameCipher::new(&key).expect("valid key")
}

/// A worker over in-memory ports, with handles to inspect each one.
pub struct Harness {
    pub jobs: Arc<MemoryJobStore>,
    pub transactions: Arc<MemoryTransactions>,
    pub categories: Arc<MemoryCategories>,
    pub blobs: Arc<MemoryBlobs>,
    pub vision: Arc<ScriptedVision>,
    pub cipher: Arc<FrameCipher>,
    pub worker: Worker,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(WorkerSettings::default())
    }

    pub fn with_settings(settings: WorkerSettings) -> Self {
        Self::build(settings, 12, 3)
    }

    pub fn build(settings: WorkerSettings, batch_size: usize, rate_limit_attempts: u32) -> Self {
        let jobs = Arc::new(MemoryJobStore::default());
        let transactions = Arc::new(MemoryTransactions::default());
        let categories = Arc::new(MemoryCategories::default());
        let blobs = Arc::new(MemoryBlobs::default());
        let vision = Arc::new(ScriptedVision::default());
        let cipher = Arc::new(test_cipher());

        let worker = Worker::new(
            jobs.clone(),
            transactions.clone(),
            CategoryResolver::new(categories.clone(), None),
            Extractor::new(vision.clone(), batch_size, fast_retry(rate_limit_attempts)),
            blobs.clone(),
            cipher.clone(),
            settings,
        );

        Self {
            jobs,
            transactions,
            categories,
            blobs,
            vision,
            cipher,
            worker,
        }
    }

    /// Another worker over the same stores, as a second process would be.
    pub fn sibling_worker(&self, settings: WorkerSettings) -> Worker {
        Worker::new(
            self.jobs.clone(),
            self.transactions.clone(),
            CategoryResolver::new(self.categories.clone(), None),
            Extractor::new(self.vision.clone(), 12, fast_retry(3)),
            self.blobs.clone(),
            self.cipher.clone(),
            settings,
        )
    }

    pub async fn enqueue(&self, owner: &str, payload: JobPayload) -> Uuid {
        self.jobs
            .enqueue(owner, VIDEO_EXTRACT, &payload)
            .await
            .expect("enqueue")
    }

    /// Seed a job already claimed `minutes_ago`.
    pub fn seed_processing(&self, owner: &str, payload: JobPayload, minutes_ago: i64) -> Uuid {
        let id = Uuid::new_v4();
        let started = Utc::now() - ChronoDuration::minutes(minutes_ago);
        self.jobs.seed(Job {
            id,
            owner: owner.to_string(),
            kind: VIDEO_EXTRACT.to_string(),
            status: JobStatus::Processing,
            payload,
            result: None,
            error: None,
            retry_count: 0,
            created_at: started,
            started_at: Some(started),
            completed_at: None,
        });
        id
    }
}
