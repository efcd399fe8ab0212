//! Decoder for JSON objects returned inside completion text.
//!
//! Accepted shape, after trimming surrounding whitespace:
//!
//! ```text
//! payload := fence? json-object fence-close?
//! fence   := "```" lang-tag?      (lang-tag: [A-Za-z0-9_-]*, e.g. "json")
//! fence-close := "```"
//! ```
//!
//! Fences are only recognized at the very start and end. Anything else is
//! handed to `serde_json` as-is.

use serde::de::DeserializeOwned;
use serde_json::error::Category;
use thiserror::Error;

const FENCE: &str = "```";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("structured payload is empty")]
    Empty,
    #[error("structured payload is not valid JSON: {0}")]
    Syntax(String),
    #[error("structured payload has an unexpected shape: {0}")]
    Shape(String),
}

// At most one leading fence (with its language tag) and one trailing fence.
pub fn strip_code_fence(raw: &str) -> &str {
    let mut body = raw.trim();
    if let Some(rest) = body.strip_prefix(FENCE) {
        let tag_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
            .unwrap_or(rest.len());
        body = &rest[tag_len..];
    }
    body = body.trim();
    if let Some(rest) = body.strip_suffix(FENCE) {
        body = rest.trim_end();
    }
    body
}

pub fn decode_structured<T: DeserializeOwned>(raw: &str) -> Result<T, DecodeError> {
    let body = strip_code_fence(raw);
    if body.is_empty() {
        return Err(DecodeError::Empty);
    }
    serde_json::from_str(body).map_err(|err| match err.classify() {
        Category::Data => DecodeError::Shape(err.to_string()),
        Category::Io | Category::Syntax | Category::Eof => DecodeError::Syntax(err.to_string()),
    })
}
