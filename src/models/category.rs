use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Spending categories assigned to transactions.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, EnumString, Display, AsRefStr, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Category {
    Dining,
    Groceries,
    Gas,
    Travel,
    Transportation,
    Shopping,
    Entertainment,
    Subscriptions,
    Health,
    Utilities,
}

/// Where a shared cache entry came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, EnumString, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CategorySource {
    Heuristic,
    External,
    Manual,
}

/// Cache key for a merchant: trimmed, whitespace-collapsed, lowercased.
pub fn merchant_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
