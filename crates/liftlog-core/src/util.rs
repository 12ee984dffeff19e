//! Shared utility functions used across multiple modules.

use serde_json::Value;

/// Longest identifier kept when normalizing server-provided ids.
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Stand-in for a missing or blank server identifier.
pub const UNKNOWN_IDENTIFIER: &str = "unknown";

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Check if a string starts with `http://` or `https://`.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Truncate text to at most 180 characters for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Read an identifier out of a JSON value.
///
/// Strings are trimmed and integers are rendered in decimal; anything else,
/// including empty strings, yields `None`.
pub fn value_to_identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => normalize_text_option(Some(text.clone())),
        Value::Number(number) if number.is_i64() || number.is_u64() => Some(number.to_string()),
        _ => None,
    }
}

/// Lower-case and cap an identifier at [`MAX_IDENTIFIER_LEN`] characters.
///
/// Missing or blank identifiers become `"unknown"`.
pub fn normalize_identifier(value: Option<&Value>) -> String {
    value
        .and_then(value_to_identifier)
        .map(|id| id.to_lowercase().chars().take(MAX_IDENTIFIER_LEN).collect())
        .unwrap_or_else(|| UNKNOWN_IDENTIFIER.to_string())
}
