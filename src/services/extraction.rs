//! Transaction extraction from statement frames.
//!
//! Frames are sent to the vision model in bounded batches. Rate-limit
//! responses are retried with exponential backoff; every other failure
//! surfaces immediately. Malformed or truncated output is salvaged where
//! possible and otherwise counts as an empty batch.

use garde::Validate;
use serde_json::Value;
use std::future::Future;
use std::iter::Take;
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::RetryIf;
use tracing::{debug, info, warn};

use crate::models::transaction::TransactionCandidate;
use crate::services::json_repair;
use crate::services::vision::{VisionError, VisionModel};

/// Upper bound on images per vision call.
pub const MAX_BATCH_SIZE: usize = 12;

const EXTRACTION_PROMPT: &str = concat!(
    "These images are consecutive frames of a video scrolling through a credit card statement. ",
    "Extract every posted purchase transaction visible in the frames. ",
    "Return ONLY a JSON array. Each element must be an object with exactly these fields: ",
    "\"merchant\" (merchant name as printed), \"date\" (transaction date as printed), ",
    "\"amount\" (amount spent as a number, no currency symbol), ",
    "\"rewards\" (reward value earned as a number, in the reward unit printed on the statement; 0 if none). ",
    "Do NOT include transactions marked as pending. ",
    "Do NOT include payments made to the card account, statement credits or balance transfers. ",
    "List a transaction once even if it appears in several frames. ",
    "If no transactions are visible, return []."
);

/// Exponential backoff for rate-limited calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Sleeps between attempts: base, 2*base, 4*base, ...
    pub fn strategy(&self) -> Take<ExponentialBackoff> {
        let base_ms = self.base_delay.as_millis().min(u64::MAX as u128) as u64;
        ExponentialBackoff::from_millis(2)
            .factor(base_ms / 2)
            .take(self.max_attempts.saturating_sub(1) as usize)
    }
}

/// Run `op`, retrying only on [`VisionError::RateLimited`].
pub async fn with_rate_limit_retry<T, F, Fut>(policy: &RetryPolicy, op: F) -> Result<T, VisionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, VisionError>>,
{
    let retries = policy.max_attempts.saturating_sub(1);
    let mut rate_limited = 0u32;
    RetryIf::spawn(policy.strategy(), op, |e: &VisionError| {
        if !e.is_rate_limited() {
            return false;
        }
        // Also consulted for the final error, which is not retried.
        rate_limited += 1;
        if rate_limited <= retries {
            warn!(
                attempt = rate_limited,
                max_attempts = policy.max_attempts,
                "Vision model rate limited, backing off"
            );
            metrics::counter!("vision_rate_limit_retries_total").increment(1);
        }
        true
    })
    .await
}

/// Turns frames into transaction candidates.
pub struct Extractor {
    model: Arc<dyn VisionModel>,
    batch_size: usize,
    retry: RetryPolicy,
}

impl Extractor {
    pub fn new(model: Arc<dyn VisionModel>, batch_size: usize, retry: RetryPolicy) -> Self {
        Self {
            model,
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
            retry,
        }
    }

    /// Extract candidates from all frames, batch by batch, in frame order.
    pub async fn extract(&self, frames: &[Vec<u8>]) -> Result<Vec<TransactionCandidate>, ExtractionError> {
        let images: Vec<Vec<u8>> = frames
            .iter()
            .enumerate()
            .filter_map(|(i, f)| {
                if image::guess_format(f).is_ok() {
                    Some(f.clone())
                } else {
                    warn!(frame = i, bytes = f.len(), "Skipping frame that is not a recognized image");
                    None
                }
            })
            .collect();

        if images.is_empty() {
            return Err(ExtractionError::NoFrames);
        }

        let mut candidates = Vec::new();
        for (batch_index, batch) in images.chunks(self.batch_size).enumerate() {
            let text = with_rate_limit_retry(&self.retry, || self.model.analyze(batch, EXTRACTION_PROMPT))
                .await
                .map_err(|e| match e {
                    VisionError::RateLimited(msg) => ExtractionError::RateLimitExhausted {
                        attempts: self.retry.max_attempts,
                        message: msg,
                    },
                    other => ExtractionError::Vision(other),
                })?;

            let parsed = parse_candidates(&text);
            debug!(
                batch = batch_index,
                frames = batch.len(),
                candidates = parsed.len(),
                "Parsed vision model batch"
            );
            candidates.extend(parsed);
        }

        info!(frames = images.len(), candidates = candidates.len(), "Extraction complete");
        Ok(candidates)
    }
}

/// Parse a model response into validated candidates.
///
/// Never fails: unrecoverable output yields an empty list, and individual
/// elements that cannot be mapped or validated are dropped.
pub fn parse_candidates(text: &str) -> Vec<TransactionCandidate> {
    let Some(items) = json_repair::parse_model_array(text) else {
        if !text.trim().is_empty() {
            debug!(response_len = text.len(), "Vision model response carried no transaction array");
        }
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let candidate = candidate_from_value(item)?;
            match candidate.validate() {
                Ok(()) => Some(candidate),
                Err(report) => {
                    warn!(merchant = %candidate.merchant_name, error = %report, "Dropping invalid candidate");
                    None
                }
            }
        })
        .collect()
}

fn candidate_from_value(value: &Value) -> Option<TransactionCandidate> {
    let obj = value.as_object()?;
    let field = |names: &[&str]| names.iter().find_map(|n| obj.get(*n)).filter(|v| !v.is_null());

    let merchant_name = field(&["merchant", "merchant_name", "name", "description"])?
        .as_str()?
        .trim()
        .to_string();
    let date = match field(&["date", "transaction_date"])? {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    let amount = decimal(field(&["amount", "amount_spent", "spent"])?)?;
    let rewards = field(&["rewards", "reward", "rewards_earned"])
        .and_then(decimal)
        .unwrap_or(0.0);

    Some(TransactionCandidate {
        merchant_name,
        date,
        amount,
        rewards,
    })
}

/// Read a number that may arrive as JSON number or as statement text like
/// "$1,234.50", "1.234,50", "4,50" or "(4.50)".
fn decimal(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => decimal_text(s),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn decimal_text(text: &str) -> Option<f64> {
    let text = text.trim();
    let negative = text.contains('-') || (text.starts_with('(') && text.ends_with(')'));
    let digits: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();

    let plain = match (digits.rfind(','), digits.rfind('.')) {
        // Whichever separator comes last is the decimal point.
        (Some(comma), Some(dot)) if comma > dot => digits.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => digits.replace(',', ""),
        (Some(_), None) => {
            let groups: Vec<&str> = digits.split(',').collect();
            match groups.as_slice() {
                [_, cents] if (1..=2).contains(&cents.len()) => digits.replace(',', "."),
                [_, rest @ ..] if rest.iter().all(|g| g.len() == 3) => digits.replace(',', ""),
                _ => return None,
            }
        }
        (None, _) => digits,
    };

    let magnitude: f64 = plain.parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("No usable image frames in job payload")]
    NoFrames,

    #[error("Vision model still rate limited after {attempts} attempts: {message}")]
    RateLimitExhausted { attempts: u32, message: String },

    #[error("Vision model call failed: {0}")]
    Vision(VisionError),
}
