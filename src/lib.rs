//! Statement scan
//!
//! Extracts card transactions from screen-recording frames of a statement
//! using a Cloudflare Workers AI vision model. Frames are queued as jobs in
//! PostgreSQL, processed by bounded-concurrency workers, deduplicated by
//! content fingerprint and categorized before they are stored.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
