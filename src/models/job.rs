use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::models::transaction::StoredTransaction;

/// The only job kind processed today.
pub const VIDEO_EXTRACT: &str = "video_extract";

/// Status of an extraction job in the durable queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, EnumString, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Reference to a frame blob held in object storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlobRef {
    pub key: String,
    pub size: u64,
}

/// Input for a job: frames inlined as base64, or references to stored blobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    Inline { frames: Vec<String> },
    Stored { blobs: Vec<BlobRef> },
}

impl JobPayload {
    pub fn frame_count(&self) -> usize {
        match self {
            JobPayload::Inline { frames } => frames.len(),
            JobPayload::Stored { blobs } => blobs.len(),
        }
    }
}

/// An extraction job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub owner: String,
    pub kind: String,
    pub status: JobStatus,
    pub payload: JobPayload,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Summary stored on a completed job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobResult {
    /// Candidates returned by the vision model across all batches.
    pub extracted: usize,
    pub added: usize,
    pub duplicates: usize,
    /// Candidates dropped for an unparseable date.
    pub skipped: usize,
    pub transactions: Vec<StoredTransaction>,
}

/// What a polling client sees for a job.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub retry_count: i32,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            retry_count: job.retry_count,
            result: job.result,
            error: job.error,
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}

/// Response after enqueueing a job.
#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub message: String,
}
