//! Pulled change model

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::{Document, EntityKind};
use crate::util::value_to_identifier;

/// Kind of server change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Upsert,
    Delete,
    /// A change type added on the server after this build; skipped on apply
    #[serde(other)]
    Unknown,
}

/// One authoritative change delivered by a pull.
///
/// `entity` stays a raw string so that kinds unknown to this build can be
/// skipped instead of failing the whole batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullChange {
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub entity: String,
    #[serde(deserialize_with = "deserialize_identifier")]
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Value>,
}

impl PullChange {
    pub fn upsert(entity: EntityKind, entity_id: impl Into<String>, doc: Document) -> Self {
        Self {
            change_type: ChangeType::Upsert,
            entity: entity.as_str().to_string(),
            entity_id: entity_id.into(),
            doc: Some(doc),
            version: None,
        }
    }

    pub fn delete(entity: EntityKind, entity_id: impl Into<String>, version: Option<u64>) -> Self {
        Self {
            change_type: ChangeType::Delete,
            entity: entity.as_str().to_string(),
            entity_id: entity_id.into(),
            doc: None,
            version: version.map(Value::from),
        }
    }
}

/// An entity the client asks the server to deliver again on the next pull.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefetchKey {
    pub entity: EntityKind,
    pub entity_id: String,
}

fn deserialize_identifier<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_to_identifier(&value)
        .ok_or_else(|| serde::de::Error::custom("entityId must be a non-empty string or integer"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_numeric_entity_ids() {
        let change: PullChange = serde_json::from_value(json!({
            "type": "delete",
            "entity": "plans",
            "entityId": 17,
            "version": 4
        }))
        .unwrap();
        assert_eq!(change.entity_id, "17");
        assert_eq!(change.change_type, ChangeType::Delete);
    }

    #[test]
    fn unknown_change_types_are_preserved_as_unknown() {
        let change: PullChange = serde_json::from_value(json!({
            "type": "patch",
            "entity": "plans",
            "entityId": "p1"
        }))
        .unwrap();
        assert_eq!(change.change_type, ChangeType::Unknown);
    }

    #[test]
    fn rejects_missing_entity_id() {
        let result = serde_json::from_value::<PullChange>(json!({
            "type": "upsert",
            "entity": "plans",
            "entityId": ""
        }));
        assert!(result.is_err());
    }
}
