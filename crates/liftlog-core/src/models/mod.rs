//! Data models for liftlog sync

mod change;
mod conflict;
mod entity;
mod mutation;
mod record;

pub use change::{ChangeType, PullChange, RefetchKey};
pub use conflict::{Conflict, ConflictReason, UNKNOWN_ENTITY, UNKNOWN_ENTITY_LABEL};
pub use entity::EntityKind;
pub use mutation::{Mutation, Operation};
pub use record::{normalize_tombstone, normalize_version, parse_version, Record};

/// A JSON object document, the shape of every synced entity.
pub type Document = serde_json::Map<String, serde_json::Value>;
