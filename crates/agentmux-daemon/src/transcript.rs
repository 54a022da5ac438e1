//! Agent transcript reading.
//!
//! The turn-completion hook receives a `transcript_path` pointing at the
//! agent's JSONL session transcript. Each record wraps a message; the last
//! one with role `assistant` holds the completed turn's content blocks,
//! which are forwarded verbatim.

use std::io::{BufRead, BufReader};
use std::path::Path;

use serde_json::Value;

/// Extract the last assistant turn's content-block array from a JSONL
/// transcript. Malformed lines are skipped; a missing or empty file yields
/// `None`.
pub fn last_assistant_turn(path: &Path) -> Option<Vec<Value>> {
    let file = std::fs::File::open(path).ok()?;
    let reader = BufReader::new(file);

    let mut last: Option<Vec<Value>> = None;
    for line in reader.lines() {
        let Ok(line) = line else { continue };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(record) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        let message = &record["message"];
        if message["role"] == "assistant" {
            if let Some(content) = message["content"].as_array() {
                last = Some(content.clone());
            }
        }
    }
    last
}
