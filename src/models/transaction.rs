use chrono::NaiveDate;
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::category::Category;

/// A transaction row as read by the vision model, before normalization.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct TransactionCandidate {
    #[garde(length(min = 1, max = 200))]
    pub merchant_name: String,

    #[garde(length(min = 1, max = 50))]
    pub date: String,

    #[garde(range(min = -1_000_000.0, max = 1_000_000.0))]
    pub amount: f64,

    /// Reward value in the deployment's reward unit; carried as an opaque decimal.
    #[garde(range(min = 0.0, max = 1_000_000.0))]
    pub rewards: f64,
}

/// A normalized transaction ready for insertion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewTransaction {
    pub fingerprint: String,
    pub owner: String,
    pub merchant_name: String,
    pub date: NaiveDate,
    pub amount: f64,
    pub rewards: f64,
    pub category: Option<Category>,
    pub job_id: Uuid,
}

/// Per-transaction entry in a job result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredTransaction {
    pub fingerprint: String,
    pub merchant_name: String,
    pub date: NaiveDate,
    pub amount: f64,
    pub rewards: f64,
    pub category: Option<Category>,
    pub duplicate: bool,
}

impl StoredTransaction {
    pub fn from_new(tx: &NewTransaction, duplicate: bool) -> Self {
        Self {
            fingerprint: tx.fingerprint.clone(),
            merchant_name: tx.merchant_name.clone(),
            date: tx.date,
            amount: tx.amount,
            rewards: tx.rewards,
            category: tx.category,
            duplicate,
        }
    }
}
