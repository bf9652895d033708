//! Extraction of stock metadata from free-form provider replies.
//!
//! Providers are asked for JSON but often wrap it in prose or code fences, so
//! the parser locates the first balanced `{...}` object and validates it
//! field by field instead of deserializing the whole reply.

use crate::error::ParseError;
use crate::types::{Metadata, MAX_KEYWORDS, MAX_TITLE_CHARS};
use serde_json::Value;

/// Parse a provider reply into [`Metadata`], applying field limits.
pub fn parse(raw: &str) -> Result<Metadata, ParseError> {
    if raw.trim().is_empty() {
        return Err(ParseError::EmptyResponse);
    }

    let object = extract_json_object(raw).ok_or(ParseError::NoJson)?;
    let value: Value =
        serde_json::from_str(object).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

    let title = required_text(&value, "title")?;
    let category = required_text(&value, "category")?;
    let keywords = match value.get("keywords") {
        None | Some(Value::Null) => return Err(ParseError::MissingField("keywords")),
        Some(Value::Array(items)) => clean_keywords(items),
        // Non-array keyword values are tolerated as "no keywords"
        Some(_) => Vec::new(),
    };

    Ok(Metadata {
        title: truncate_chars(&title, MAX_TITLE_CHARS),
        keywords,
        category,
    })
}

/// Return the first balanced, brace-delimited object in `text`.
///
/// Braces inside JSON string literals are ignored so titles like
/// `"Kids {party}"` do not end the object early.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Read a scalar field as trimmed text. Empty strings count as missing.
fn required_text(value: &Value, field: &'static str) -> Result<String, ParseError> {
    let text = value
        .get(field)
        .and_then(scalar_to_string)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    if text.is_empty() {
        Err(ParseError::MissingField(field))
    } else {
        Ok(text)
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn clean_keywords(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(scalar_to_string)
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .take(MAX_KEYWORDS)
        .collect()
}

/// Cut `text` to at most `max` characters, never splitting a code point.
fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => text[..byte_idx].trim_end().to_string(),
        None => text.to_string(),
    }
}
