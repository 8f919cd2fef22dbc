use serde::Deserialize;
use std::time::Duration;

use crate::services::extraction::RetryPolicy;
use crate::services::vision::DEFAULT_VISION_MODEL;
use crate::services::worker::WorkerSettings;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Cloudflare account ID
    pub cf_account_id: String,

    /// Cloudflare Workers AI API token
    pub cf_api_token: String,

    /// Workers AI vision model used for extraction
    #[serde(default = "default_vision_model")]
    pub vision_model: String,

    /// R2 bucket name
    pub r2_bucket: String,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: String,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: String,

    /// R2 endpoint URL
    pub r2_endpoint: String,

    /// AES-256-GCM key for frames at rest (base64-encoded, 32 bytes)
    pub encryption_key: String,

    /// Google Places API key. Unset disables the external category lookup.
    #[serde(default)]
    pub places_api_key: Option<String>,

    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: i64,

    /// Minutes a job may stay in processing before it is presumed abandoned
    #[serde(default = "default_stuck_job_minutes")]
    pub stuck_job_minutes: i32,

    /// Automatic requeues allowed for a failed job
    #[serde(default = "default_max_job_retries")]
    pub max_job_retries: i32,

    /// Failed jobs requeued per worker invocation
    #[serde(default = "default_requeue_batch_size")]
    pub requeue_batch_size: i64,

    /// Frames per vision model call
    #[serde(default = "default_extraction_batch_size")]
    pub extraction_batch_size: usize,

    #[serde(default = "default_rate_limit_max_attempts")]
    pub rate_limit_max_attempts: u32,

    #[serde(default = "default_rate_limit_base_delay_ms")]
    pub rate_limit_base_delay_ms: u64,

    /// Worker binary polling interval
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Wall-clock budget for one worker invocation
    #[serde(default = "default_invocation_timeout_secs")]
    pub invocation_timeout_secs: u64,

    /// Wall-clock budget for one job inside an invocation
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_vision_model() -> String {
    DEFAULT_VISION_MODEL.to_string()
}

fn default_max_concurrent_jobs() -> i64 {
    2
}

fn default_stuck_job_minutes() -> i32 {
    5
}

fn default_max_job_retries() -> i32 {
    3
}

fn default_requeue_batch_size() -> i64 {
    5
}

fn default_extraction_batch_size() -> usize {
    10
}

fn default_rate_limit_max_attempts() -> u32 {
    5
}

fn default_rate_limit_base_delay_ms() -> u64 {
    2000
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_invocation_timeout_secs() -> u64 {
    270
}

fn default_job_timeout_secs() -> u64 {
    240
}

/// Headroom kept between a job's budget and the stuck-job threshold for
/// blob cleanup and the final store write.
const FINALIZE_MARGIN_SECS: u64 = 30;

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            max_concurrent_jobs: self.max_concurrent_jobs,
            stuck_job_minutes: self.stuck_job_minutes,
            max_job_retries: self.max_job_retries,
            requeue_batch_size: self.requeue_batch_size,
            job_timeout: self.bounded("JOB_TIMEOUT_SECS", self.job_timeout_secs),
        }
    }

    /// Longest a job may run before the recovery sweep could take it over.
    fn staleness_budget(&self) -> Duration {
        let threshold = self.stuck_job_minutes.max(0) as u64 * 60;
        Duration::from_secs(threshold.saturating_sub(FINALIZE_MARGIN_SECS).max(1))
    }

    /// Clamp a timeout so no job outlives the stuck-job threshold.
    fn bounded(&self, name: &str, secs: u64) -> Duration {
        let budget = self.staleness_budget();
        let requested = Duration::from_secs(secs);
        if requested > budget {
            tracing::warn!(
                setting = name,
                requested_secs = secs,
                clamped_secs = budget.as_secs(),
                stuck_job_minutes = self.stuck_job_minutes,
                "Timeout exceeds the stuck-job threshold, clamping"
            );
            budget
        } else {
            requested
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.rate_limit_max_attempts.max(1),
            base_delay: Duration::from_millis(self.rate_limit_base_delay_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn invocation_timeout(&self) -> Duration {
        self.bounded("INVOCATION_TIMEOUT_SECS", self.invocation_timeout_secs)
    }
}
