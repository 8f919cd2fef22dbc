//! Statement date normalization.
//!
//! Statements render dates in several layouts. Everything is reduced to a
//! `NaiveDate` displayed as `YYYY-MM-DD`. Numeric layouts are read in US
//! order (month first) by position; no locale inference is attempted.

use chrono::{Datelike, NaiveDate};
use std::fmt;

/// Numeric layouts, tried in order.
const NUMERIC_FORMATS: &[&str] = &["%m/%d/%Y", "%m-%d-%Y", "%Y-%m-%d", "%Y/%m/%d"];

/// Two-digit year layouts, tried only after the four-digit ones fail.
const SHORT_YEAR_FORMATS: &[&str] = &["%m/%d/%y", "%m-%d-%y"];

/// Month-name layouts. `%B` accepts both abbreviated and full names, case-insensitively.
const TEXT_FORMATS: &[&str] = &["%B %d, %Y", "%B %d %Y", "%d %B %Y"];

const MIN_YEAR: i32 = 1970;
const MAX_YEAR: i32 = 2100;

/// A date in canonical form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CanonicalDate(NaiveDate);

impl CanonicalDate {
    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for CanonicalDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

/// The input matched none of the accepted layouts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unparseable date: {0:?}")]
pub struct UnparseableDate(pub String);

/// Parse a free-form statement date.
pub fn normalize_date(raw: &str) -> Result<CanonicalDate, UnparseableDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(UnparseableDate(raw.to_string()));
    }

    let parsed = if trimmed.chars().any(|c| c.is_ascii_alphabetic()) {
        let cleaned = clean_textual(trimmed);
        try_formats(&cleaned, TEXT_FORMATS)
    } else {
        try_formats(trimmed, NUMERIC_FORMATS).or_else(|| try_formats(trimmed, SHORT_YEAR_FORMATS))
    };

    parsed
        .map(CanonicalDate)
        .ok_or_else(|| UnparseableDate(raw.to_string()))
}

fn try_formats(input: &str, formats: &[&str]) -> Option<NaiveDate> {
    formats.iter().find_map(|fmt| {
        NaiveDate::parse_from_str(input, fmt)
            .ok()
            .filter(|d| (MIN_YEAR..=MAX_YEAR).contains(&d.year()))
    })
}

/// Collapse whitespace, drop abbreviation periods and fix "Sept".
fn clean_textual(input: &str) -> String {
    let collapsed = input
        .replace('.', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace(" ,", ",");

    let lower = collapsed.to_lowercase();
    if lower.starts_with("sept ") {
        format!("Sep{}", &collapsed[4..])
    } else {
        collapsed
    }
}
