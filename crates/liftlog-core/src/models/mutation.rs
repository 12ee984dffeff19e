//! Pending mutation model

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Document, EntityKind};

/// A local write waiting for the server to acknowledge it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    /// Client-generated id used for de-duplication and conflict correlation
    pub op_id: String,
    pub entity: EntityKind,
    pub entity_id: String,
    /// Server version the edit was made against
    pub base_version: u64,
    #[serde(flatten)]
    pub operation: Operation,
}

/// What a mutation does to its entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Operation {
    Upsert { payload: Document },
    Delete,
}

impl Mutation {
    /// Create an upsert with a fresh UUID v7 op id.
    #[must_use]
    pub fn upsert(
        entity: EntityKind,
        entity_id: impl Into<String>,
        base_version: u64,
        payload: Document,
    ) -> Self {
        Self {
            op_id: new_op_id(),
            entity,
            entity_id: entity_id.into(),
            base_version,
            operation: Operation::Upsert { payload },
        }
    }

    /// Create a delete with a fresh UUID v7 op id.
    #[must_use]
    pub fn delete(entity: EntityKind, entity_id: impl Into<String>, base_version: u64) -> Self {
        Self {
            op_id: new_op_id(),
            entity,
            entity_id: entity_id.into(),
            base_version,
            operation: Operation::Delete,
        }
    }
}

fn new_op_id() -> String {
    Uuid::now_v7().to_string()
}
