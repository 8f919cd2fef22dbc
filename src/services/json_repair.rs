//! Best-effort recovery of JSON arrays emitted by a language model.
//!
//! Model output is frequently wrapped in prose or code fences, and long
//! responses get cut off at the output token limit. A cut-off array still
//! carries every element that was fully written before the cut; this module
//! recovers those instead of discarding the batch.

use serde_json::Value;

/// Extract the JSON array carried in a model response.
///
/// Returns `None` when the text holds no array at all (e.g. "No transactions
/// found") or when nothing could be recovered.
pub fn parse_model_array(text: &str) -> Option<Vec<Value>> {
    let stripped = strip_fences(text);
    let start = stripped.find('[')?;

    if let Some(end) = stripped.rfind(']') {
        if end > start {
            if let Ok(Value::Array(items)) = serde_json::from_str(&stripped[start..=end]) {
                return Some(items);
            }
        }
    }

    repair_truncated_array(&stripped[start..])
}

/// Remove markdown code fences (```json … ```) around the payload.
fn strip_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Recover the complete leading elements of a truncated array.
///
/// `text` must start at the opening `[`. The scan tracks string and escape
/// state so brackets inside strings are ignored, remembers where the last
/// top-level element closed, cuts there and re-closes the array.
pub fn repair_truncated_array(text: &str) -> Option<Vec<Value>> {
    let bytes = text.as_bytes();
    if bytes.first() != Some(&b'[') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut last_complete: Option<usize> = None;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'[' | b'{' => depth += 1,
            b']' | b'}' => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
                if depth == 1 {
                    last_complete = Some(i + 1);
                } else if depth == 0 {
                    // Closed cleanly; whatever failed to parse was not truncation.
                    last_complete = Some(i);
                    break;
                }
            }
            _ => {}
        }
    }

    let end = last_complete?;
    let body = text[..end].trim_end().trim_end_matches(',');
    let repaired = format!("{}]", body);

    match serde_json::from_str::<Value>(&repaired) {
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    }
}
