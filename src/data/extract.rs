//! Strict JSON extraction from generative-text responses
//!
//! Model output often wraps JSON in Markdown fences or surrounds it with
//! prose. Candidates start at each `{` or `[`; each is parsed with a real JSON
//! parser, so brackets inside string literals never confuse the search.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Errors from extracting JSON out of free text
#[derive(Debug, Error)]
pub enum ParseError {
    /// No `{` or `[` in the text at all
    #[error("No JSON value found in response")]
    NoJson,

    /// Candidates were found but none parsed into the expected shape
    #[error("Invalid JSON in response: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Removes a surrounding Markdown code fence, if present
pub fn strip_code_fences(text: &str) -> &str {
    let mut cleaned = text.trim();
    if let Some(rest) = cleaned.strip_prefix("```") {
        // Drop the info string ("json", "JSON", ...) up to the first newline
        cleaned = match rest.find('\n') {
            Some(pos) if rest[..pos].chars().all(|c| c.is_ascii_alphanumeric()) => &rest[pos + 1..],
            _ => rest,
        };
    }
    if let Some(rest) = cleaned.trim_end().strip_suffix("```") {
        cleaned = rest;
    }
    cleaned.trim()
}

/// Parses the first JSON value in `text` that deserializes into `T`
pub fn extract_json<T: DeserializeOwned>(text: &str) -> Result<T, ParseError> {
    let cleaned = strip_code_fences(text);
    let mut first_error: Option<serde_json::Error> = None;

    for (start, _) in cleaned.match_indices(|c: char| c == '{' || c == '[') {
        let mut stream = serde_json::Deserializer::from_str(&cleaned[start..]).into_iter::<Value>();
        let attempt = match stream.next() {
            Some(Ok(value)) => serde_json::from_value::<T>(value),
            Some(Err(err)) => Err(err),
            None => continue,
        };
        match attempt {
            Ok(parsed) => return Ok(parsed),
            Err(err) => {
                first_error.get_or_insert(err);
            }
        }
    }

    match first_error {
        Some(err) => Err(ParseError::Invalid(err)),
        None => Err(ParseError::NoJson),
    }
}
