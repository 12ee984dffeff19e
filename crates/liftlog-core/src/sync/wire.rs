//! JSON bodies exchanged with the sync server.
//!
//! Requests are strict; responses are read leniently so that one odd field
//! from a newer server does not fail a whole cycle.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::models::{EntityKind, Mutation, PullChange, RefetchKey};
use crate::util::value_to_identifier;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub device_id: String,
    pub base_cursor: Option<String>,
    pub mutations: Vec<Mutation>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PushResponse {
    #[serde(deserialize_with = "deserialize_identifiers")]
    pub acknowledged_op_ids: Vec<String>,
    pub conflicts: Vec<RawConflict>,
    pub failed: Vec<FailedEntry>,
    #[serde(deserialize_with = "deserialize_cursor")]
    pub new_cursor: Option<String>,
}

/// A conflict entry exactly as the server sent it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawConflict {
    pub op_id: Option<Value>,
    pub entity: Option<Value>,
    pub entity_id: Option<Value>,
    pub server_version: Option<Value>,
    pub reason: Option<Value>,
    pub server_doc: Option<Value>,
}

/// A terminally rejected mutation, either a bare op id or a detailed entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FailedEntry {
    OpId(String),
    Detailed {
        #[serde(rename = "opId", default)]
        op_id: Option<Value>,
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
}

impl FailedEntry {
    pub fn op_id(&self) -> Option<String> {
        match self {
            Self::OpId(op_id) => value_to_identifier(&Value::String(op_id.clone())),
            Self::Detailed { op_id, .. } => op_id.as_ref().and_then(value_to_identifier),
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::OpId(_) => None,
            Self::Detailed { reason, .. } => reason.as_deref(),
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::OpId(_) => None,
            Self::Detailed { message, .. } => message.as_deref(),
        }
    }
}

/// A mutation the server refused for good; it leaves the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedMutation {
    pub op_id: String,
    /// Filled in from the queue when the op id was still queued
    pub entity: Option<EntityKind>,
    pub entity_id: Option<String>,
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl RejectedMutation {
    pub fn from_entry(entry: &FailedEntry) -> Option<Self> {
        Some(Self {
            op_id: entry.op_id()?,
            entity: None,
            entity_id: None,
            reason: entry.reason().map(ToString::to_string),
            message: entry.message().map(ToString::to_string),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub device_id: String,
    pub cursor: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub refetch: Vec<RefetchKey>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PullResponse {
    pub changes: Vec<PullChange>,
    #[serde(deserialize_with = "deserialize_cursor")]
    pub new_cursor: Option<String>,
}

/// Cursors are opaque; servers that count with integers still work.
fn deserialize_cursor<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_to_identifier))
}

fn deserialize_identifiers<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(values.iter().filter_map(value_to_identifier).collect())
}
