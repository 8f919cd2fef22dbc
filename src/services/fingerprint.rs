//! Content fingerprints for transaction identity.
//!
//! The fingerprint is the primary key of the `transactions` table, so a
//! replayed job (or the same row seen in two overlapping frames) inserts at
//! most once.

use chrono::NaiveDate;
use sha2::{Digest, Sha256};

use crate::models::category::merchant_key;

const PREFIX: &str = "txn_";

/// Hex characters of the digest kept in the fingerprint (96 bits).
const DIGEST_HEX_LEN: usize = 24;

/// Derive the stable identifier for a transaction.
///
/// The merchant name is trimmed, whitespace-collapsed and lowercased; amounts
/// are rendered with fixed precision so the output does not depend on float
/// formatting, locale or timezone.
pub fn fingerprint(
    owner: &str,
    merchant_name: &str,
    date: NaiveDate,
    amount: f64,
    rewards: f64,
) -> String {
    let canonical = format!(
        "{}|{}|{}|{:.2}|{:.4}",
        owner,
        merchant_key(merchant_name),
        date.format("%Y-%m-%d"),
        amount,
        rewards
    );

    let digest = Sha256::digest(canonical.as_bytes());
    let mut out = String::with_capacity(PREFIX.len() + DIGEST_HEX_LEN);
    out.push_str(PREFIX);
    out.push_str(&hex::encode(digest)[..DIGEST_HEX_LEN]);
    out
}
