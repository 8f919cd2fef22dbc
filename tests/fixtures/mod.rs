//! Frames and canned vision model answers.

#![allow(dead_code)]

use base64::Engine;
use statement_scan::models::job::{BlobRef, JobPayload};

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

/// A byte string that sniffs as PNG, tagged so each frame is distinct.
pub fn frame(tag: u8) -> Vec<u8> {
    let mut bytes = PNG_MAGIC.to_vec();
    bytes.extend_from_slice(b"\0\0\0\rIHDR");
    bytes.push(tag);
    bytes
}

/// A frame that is not an image at all.
pub fn garbage_frame() -> Vec<u8> {
    b"definitely not an image".to_vec()
}

pub fn inline_payload(frames: &[Vec<u8>]) -> JobPayload {
    JobPayload::Inline {
        frames: frames
            .iter()
            .map(|f| base64::engine::general_purpose::STANDARD.encode(f))
            .collect(),
    }
}

pub fn stored_payload(keys: &[&str]) -> JobPayload {
    JobPayload::Stored {
        blobs: keys
            .iter()
            .map(|k| BlobRef {
                key: k.to_string(),
                size: 0,
            })
            .collect(),
    }
}

/// Three rows: two parse, one has a date no format accepts.
pub const STATEMENT_RESPONSE: &str = r#"Here are the transactions:
```json
[
  {"merchant": "STARBUCKS STORE 1458", "date": "01/05/2024", "amount": 4.50, "rewards": 0.09},
  {"merchant": "Shell Oil 5744", "date": "Jan 6, 2024", "amount": "$40.12", "rewards": 0.8},
  {"merchant": "Corner Bistro", "date": "sometime last week", "amount": 18.00, "rewards": 0}
]
```"#;

/// Output cut off mid-object by the token limit.
pub const TRUNCATED_RESPONSE: &str = r#"[
  {"merchant": "Netflix.com", "date": "2024-02-01", "amount": 15.49, "rewards": 0.31},
  {"merchant": "Whole Foods Market", "date": "02/03/2024", "amount": 82.10, "rewards": 1.64},
  {"merchant": "Lyft *Ride", "date": "02/0"#;

pub const EMPTY_RESPONSE: &str = "[]";
