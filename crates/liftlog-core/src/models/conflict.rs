//! Sync conflict model

use serde::{Deserialize, Serialize};

use super::{Document, EntityKind};

/// Entity key shown for conflicts naming a kind this build does not know.
pub const UNKNOWN_ENTITY: &str = "unknown_entity";
/// Label shown for conflicts naming a kind this build does not know.
pub const UNKNOWN_ENTITY_LABEL: &str = "Unknown Item";

/// Why the server refused a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    VersionMismatch,
    InvalidPayload,
    UpdateFailed,
    InsertFailed,
    FetchFailed,
    UnknownConflict,
}

impl ConflictReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VersionMismatch => "version_mismatch",
            Self::InvalidPayload => "invalid_payload",
            Self::UpdateFailed => "update_failed",
            Self::InsertFailed => "insert_failed",
            Self::FetchFailed => "fetch_failed",
            Self::UnknownConflict => "unknown_conflict",
        }
    }

    /// Parse a server reason; anything unrecognized is `UnknownConflict`.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
            Some("version_mismatch") => Self::VersionMismatch,
            Some("invalid_payload") => Self::InvalidPayload,
            Some("update_failed") => Self::UpdateFailed,
            Some("insert_failed") => Self::InsertFailed,
            Some("fetch_failed") => Self::FetchFailed,
            _ => Self::UnknownConflict,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::VersionMismatch => "changed on another device",
            Self::InvalidPayload => "rejected as invalid",
            Self::UpdateFailed => "could not be updated on the server",
            Self::InsertFailed => "could not be created on the server",
            Self::FetchFailed => "could not be read back from the server",
            Self::UnknownConflict => "conflicted for an unknown reason",
        }
    }
}

/// A server-reported conflict awaiting a user decision.
///
/// Identifiers are already normalized (lower-cased, capped) and `entity` is
/// `None` when the server named a kind this build does not know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub op_id: String,
    pub entity: Option<EntityKind>,
    pub entity_id: String,
    pub server_version: Option<u64>,
    pub reason: ConflictReason,
    /// The server's current document when the server sent one along
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_doc: Option<Document>,
}

impl Conflict {
    pub fn entity_key(&self) -> &'static str {
        self.entity.map_or(UNKNOWN_ENTITY, EntityKind::as_str)
    }

    pub fn label(&self) -> &'static str {
        self.entity.map_or(UNKNOWN_ENTITY_LABEL, EntityKind::label)
    }

    /// One-line description for lists and notifications.
    pub fn summary(&self) -> String {
        let server_version = self
            .server_version
            .map_or_else(|| "unknown".to_string(), |version| version.to_string());
        format!(
            "{} {} {} (server version {server_version})",
            self.label(),
            self.entity_id,
            self.reason.description()
        )
    }
}
