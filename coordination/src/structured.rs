//! Layered decoding of JSON embedded in model prose.
//!
//! Models asked for JSON routinely wrap it in markdown fences or chatty
//! preambles. Decoding runs as independent steps, each tried in order:
//!
//! 1. [`decode_strict`]: the whole text is the payload
//! 2. [`strip_fences`] then strict decode: a fenced block holds the payload
//! 3. [`extract_balanced`]: the first balanced `{…}` or `[…]` span
//!
//! If every step fails the decoder fails closed with [`ParseError`].

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("response was empty")]
    Empty,

    #[error("no JSON payload found in response ({0} chars)")]
    NoPayload(usize),

    #[error("JSON payload did not match the expected shape: {0}")]
    Shape(String),
}

/// Decode the whole text as JSON.
pub fn decode_strict(text: &str) -> Option<Value> {
    serde_json::from_str(text.trim()).ok()
}

/// Return the body of the first fenced code block, preferring a `json`
/// tagged fence.
pub fn strip_fences(text: &str) -> Option<&str> {
    const FENCE: &str = "```";

    let open = text.find("```json").or_else(|| text.find(FENCE))?;
    let after_open = &text[open + FENCE.len()..];
    // Skip the info string (e.g. `json`) up to the end of the fence line.
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_open[body_start..];
    let close = body.find(FENCE)?;
    Some(body[..close].trim())
}

/// Return the first balanced JSON object or array span, respecting string
/// literals and escapes.
pub fn extract_balanced(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Run every decode step in order and return the first JSON value found.
pub fn decode(text: &str) -> Result<Value, ParseError> {
    if text.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    if let Some(value) = decode_strict(text) {
        return Ok(value);
    }
    if let Some(value) = strip_fences(text).and_then(decode_strict) {
        return Ok(value);
    }
    if let Some(value) = extract_balanced(text).and_then(decode_strict) {
        return Ok(value);
    }
    Err(ParseError::NoPayload(text.len()))
}

/// [`decode`] followed by a typed conversion.
pub fn decode_as<T: DeserializeOwned>(text: &str) -> Result<T, ParseError> {
    let value = decode(text)?;
    serde_json::from_value(value).map_err(|e| ParseError::Shape(e.to_string()))
}
