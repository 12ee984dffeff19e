//! Entity record model

#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // float versions are floored

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Document;

const ID_FIELD: &str = "id";
const VERSION_FIELD: &str = "version";
const TOMBSTONE_FIELD: &str = "is_deleted";
const NAME_FIELD: &str = "name";
const UPDATED_AT_FIELD: &str = "updated_at";

/// A synced entity as seen by this device.
///
/// `version` is the last server version observed for the id; the sync engine
/// never interprets `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub version: u64,
    pub is_deleted: bool,
    #[serde(default)]
    pub fields: Document,
}

impl Record {
    /// Build a record from a wire document, normalizing `version` and
    /// `is_deleted` (missing values become 0 and `false`).
    #[must_use]
    pub fn from_document(id: impl Into<String>, mut doc: Document) -> Self {
        let version = normalize_version(doc.get(VERSION_FIELD));
        let is_deleted = normalize_tombstone(doc.get(TOMBSTONE_FIELD));
        doc.remove(ID_FIELD);
        doc.remove(VERSION_FIELD);
        doc.remove(TOMBSTONE_FIELD);
        Self {
            id: id.into(),
            version,
            is_deleted,
            fields: doc,
        }
    }

    /// A field-less tombstone, used when a delete arrives for an unseen id.
    #[must_use]
    pub fn tombstone(id: impl Into<String>, version: u64) -> Self {
        Self {
            id: id.into(),
            version,
            is_deleted: true,
            fields: Document::new(),
        }
    }

    /// Shallow-merge `doc` onto this record; incoming fields win.
    ///
    /// `version` and `is_deleted` are only replaced when `doc` carries them.
    pub fn merge(&mut self, mut doc: Document) {
        if let Some(version) = doc.remove(VERSION_FIELD) {
            self.version = normalize_version(Some(&version));
        }
        if let Some(flag) = doc.remove(TOMBSTONE_FIELD) {
            self.is_deleted = normalize_tombstone(Some(&flag));
        }
        doc.remove(ID_FIELD);
        self.fields.extend(doc);
    }

    /// Render the record back into a flat document.
    #[must_use]
    pub fn to_document(&self) -> Document {
        let mut doc = self.fields.clone();
        doc.insert(ID_FIELD.to_string(), Value::String(self.id.clone()));
        doc.insert(VERSION_FIELD.to_string(), Value::from(self.version));
        doc.insert(TOMBSTONE_FIELD.to_string(), Value::Bool(self.is_deleted));
        doc
    }

    /// The `name` field, lower-cased for listing order.
    pub fn sort_name(&self) -> String {
        self.fields
            .get(NAME_FIELD)
            .and_then(Value::as_str)
            .map(str::to_lowercase)
            .unwrap_or_default()
    }

    /// The server `updated_at` stamp in Unix milliseconds, if present.
    ///
    /// Accepts RFC 3339 strings and numeric millisecond values.
    pub fn updated_at_millis(&self) -> Option<i64> {
        match self.fields.get(UPDATED_AT_FIELD)? {
            Value::String(text) => chrono::DateTime::parse_from_rfc3339(text.trim())
                .ok()
                .map(|stamp| stamp.timestamp_millis()),
            Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|value| value as i64)),
            _ => None,
        }
    }

    /// Listing order: case-insensitive name, then `updated_at`, then id.
    pub fn listing_order(a: &Self, b: &Self) -> Ordering {
        a.sort_name()
            .cmp(&b.sort_name())
            .then_with(|| a.updated_at_millis().cmp(&b.updated_at_millis()))
            .then_with(|| a.id.cmp(&b.id))
    }
}

/// Read a version off the wire.
///
/// Returns `None` when the value is absent or not numeric. Negative numbers
/// clamp to 0 and fractional numbers are floored.
pub fn parse_version(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(number) => Some(number.as_u64().unwrap_or_else(|| {
            number
                .as_f64()
                .filter(|value| value.is_finite() && *value > 0.0)
                .map_or(0, |value| value as u64)
        })),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    }
}

/// Read a version off the wire, defaulting to 0.
pub fn normalize_version(value: Option<&Value>) -> u64 {
    parse_version(value).unwrap_or(0)
}

/// Read a tombstone flag off the wire, defaulting to `false`.
pub fn normalize_tombstone(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().is_some_and(|value| value != 0.0),
        Some(Value::String(text)) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes"
        ),
        _ => false,
    }
}
