//! Conflict normalization and user-mediated resolution

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::wire::RawConflict;
use super::{SyncError, SyncResult};
use crate::models::{parse_version, Conflict, ConflictReason, EntityKind, Record, RefetchKey};
use crate::state::LocalState;
use crate::util::normalize_identifier;

/// Turn a server conflict entry into the display model.
pub fn normalize_conflict(raw: RawConflict) -> Conflict {
    let entity = raw
        .entity
        .as_ref()
        .and_then(Value::as_str)
        .and_then(EntityKind::parse);
    if entity.is_none() {
        tracing::warn!(entity = ?raw.entity, "Conflict names an unknown entity kind");
    }

    Conflict {
        op_id: normalize_identifier(raw.op_id.as_ref()),
        entity,
        entity_id: normalize_identifier(raw.entity_id.as_ref()),
        server_version: parse_version(raw.server_version.as_ref()),
        reason: ConflictReason::parse(raw.reason.as_ref().and_then(Value::as_str)),
        server_doc: match raw.server_doc {
            Some(Value::Object(doc)) => Some(doc),
            _ => None,
        },
    }
}

/// Which side of a conflict the user keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictChoice {
    KeepMine,
    KeepServer,
}

impl ConflictChoice {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mine" | "keep_mine" | "keep-mine" => Some(Self::KeepMine),
            "server" | "keep_server" | "keep-server" => Some(Self::KeepServer),
            _ => None,
        }
    }
}

/// Outcome of resolving one conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "resolution", rename_all = "snake_case")]
pub enum Resolution {
    /// The mutation goes out again on the next cycle against `base_version`
    Reissued { op_id: String, base_version: u64 },
    /// The local mutation was dropped in favor of the server copy
    Discarded {
        op_id: String,
        server_doc_applied: bool,
    },
    /// Keep Mine on a conflict whose mutation is no longer queued
    Dismissed { op_id: String },
}

/// Resolve the open conflict for `op_id`.
///
/// The conflict is removed before anything else, so a second call for the
/// same op id fails with [`SyncError::ConflictNotFound`].
pub fn resolve(
    state: &mut LocalState,
    op_id: &str,
    choice: ConflictChoice,
) -> SyncResult<Resolution> {
    let op_id = op_id.trim();
    let index = state
        .conflicts
        .iter()
        .position(|conflict| conflict.op_id.eq_ignore_ascii_case(op_id))
        .ok_or_else(|| SyncError::ConflictNotFound(op_id.to_string()))?;
    let conflict = state.conflicts.remove(index);
    let op_id = conflict.op_id.clone();

    match choice {
        ConflictChoice::KeepMine => keep_mine(state, conflict),
        ConflictChoice::KeepServer => Ok(keep_server(state, conflict)),
    }
    .inspect(|resolution| tracing::info!(%op_id, ?resolution, "Resolved sync conflict"))
}

fn keep_mine(state: &mut LocalState, conflict: Conflict) -> SyncResult<Resolution> {
    let Some(entry) = state.queue.get(&conflict.op_id) else {
        return Ok(Resolution::Dismissed {
            op_id: conflict.op_id,
        });
    };
    let known = state
        .store
        .version(entry.mutation.entity, &entry.mutation.entity_id);
    let base_version = conflict.server_version.unwrap_or(0).max(known);

    let Some(mutation) = state.queue.reissue(&conflict.op_id, base_version).cloned() else {
        return Ok(Resolution::Dismissed {
            op_id: conflict.op_id,
        });
    };
    state.store.apply_mutation(&mutation)?;

    Ok(Resolution::Reissued {
        op_id: conflict.op_id,
        base_version,
    })
}

fn keep_server(state: &mut LocalState, conflict: Conflict) -> Resolution {
    // The queued mutation knows the exact key; the conflict only has the
    // lower-cased one, so match it against the stored spelling.
    let target = state
        .queue
        .remove(&conflict.op_id)
        .map(|mutation| (mutation.entity, mutation.entity_id))
        .or_else(|| {
            conflict.entity.map(|kind| {
                let entity_id = state
                    .store
                    .stored_id(kind, &conflict.entity_id)
                    .unwrap_or_else(|| conflict.entity_id.clone());
                (kind, entity_id)
            })
        });

    let Some((kind, entity_id)) = target else {
        return Resolution::Discarded {
            op_id: conflict.op_id,
            server_doc_applied: false,
        };
    };

    let server_doc_applied = match conflict.server_doc {
        Some(mut doc) => {
            if !doc.contains_key("version") {
                if let Some(version) = conflict.server_version {
                    doc.insert("version".to_string(), Value::from(version));
                }
            }
            let record = Record::from_document(entity_id, doc);
            state.confirmed.overwrite(kind, record.clone());
            state.store.overwrite(kind, record);
            true
        }
        None => {
            let key = RefetchKey {
                entity: kind,
                entity_id,
            };
            if !state.refetch.contains(&key) {
                state.refetch.push(key);
            }
            false
        }
    };

    Resolution::Discarded {
        op_id: conflict.op_id,
        server_doc_applied,
    }
}
