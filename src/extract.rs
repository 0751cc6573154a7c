//! Recovery of one JSON object from free-form model output.
//!
//! Models wrap their answer in commentary, put it in a fenced code block, or
//! stop generating before the final brace. [`find_block`] copes with all
//! three:
//!
//! 1. If the text holds fenced blocks, the longest fenced body is used.
//! 2. From the first `{`, braces are counted until the depth is back to zero.
//! 3. If the text ends first, one `}` is appended and the scan is repeated.
//!
//! # Known limitation
//!
//! The counter does not know about string literals, so a `{` or `}` inside a
//! quoted value closes the block early or late. The resulting block then
//! fails to parse and the caller records an error for that item.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;

static FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)```(?:json)?\s*(.*?)```").expect("static regex"));

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("no JSON object found in model output")]
    NotFound,

    #[error("invalid JSON object: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Return the first balanced `{...}` block of `text`, or `None`.
pub fn find_block(text: &str) -> Option<String> {
    let working = FENCE
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .max_by_key(|body| body.len())
        .filter(|body| !body.is_empty())
        .unwrap_or(text);

    let start = working.find('{')?;
    if let Some(end) = balanced_end(&working[start..]) {
        return Some(working[start..start + end].to_string());
    }

    // truncated generation: close the outermost object once and retry
    let repaired = format!("{}}}", &working[start..]);
    balanced_end(&repaired).map(|end| repaired[..end].to_string())
}

/// Byte offset just past the brace that closes the one at offset 0.
fn balanced_end(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, b) in s.bytes().enumerate() {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Find a block in `text` and deserialize it.
pub fn parse_block<T: DeserializeOwned>(text: &str) -> Result<T, ExtractError> {
    let block = find_block(text).ok_or(ExtractError::NotFound)?;
    Ok(serde_json::from_str(&block)?)
}
