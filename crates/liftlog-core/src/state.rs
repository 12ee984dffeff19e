//! Shared sync state types.

use crate::models::{Conflict, EntityKind, RefetchKey};
use crate::queue::MutationQueue;
use crate::store::EntityStore;

/// Coarse sync status surfaced to clients.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncState {
    #[default]
    Idle,
    Syncing,
    Synced,
    Error,
    /// The last cycle failed authorization; the user must sign in again
    NeedsAuth,
}

/// Everything the sync engine keeps durable for one device.
///
/// Persisted as a unit so that queue changes, store application, and cursor
/// advance land together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalState {
    pub device_id: String,
    pub cursor: Option<String>,
    pub store: EntityStore,
    /// Records as the server last confirmed them, without local overlays
    pub confirmed: EntityStore,
    pub queue: MutationQueue,
    pub conflicts: Vec<Conflict>,
    /// Entities to ask the server to re-deliver on the next pull
    pub refetch: Vec<RefetchKey>,
}

impl LocalState {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Self::default()
        }
    }

    /// Forget all synced data but keep the device identity.
    pub fn reset(&mut self) {
        self.cursor = None;
        self.store.reset();
        self.confirmed.reset();
        self.queue.clear();
        self.conflicts.clear();
        self.refetch.clear();
    }

    /// Drop local overlays on one record, falling back to the confirmed
    /// copy, or removing the record when the server never had it.
    pub fn restore_confirmed(&mut self, kind: EntityKind, id: &str) {
        match self.confirmed.get(kind, id) {
            Some(record) => self.store.overwrite(kind, record.clone()),
            None => {
                self.store.remove(kind, id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Document, Mutation, PullChange};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn restore_confirmed_reverts_or_removes_local_records() {
        let mut state = LocalState::new("device");
        let mut server_doc = Document::new();
        server_doc.insert("name".to_string(), json!("Server"));
        server_doc.insert("version".to_string(), json!(3));
        let pulled = [PullChange::upsert(EntityKind::Plans, "p1", server_doc)];
        state.store.apply_pull_changes(&pulled);
        state.confirmed.apply_pull_changes(&pulled);

        let mut edit = Document::new();
        edit.insert("name".to_string(), json!("Local"));
        state
            .store
            .apply_mutation(&Mutation::upsert(EntityKind::Plans, "p1", 3, edit.clone()))
            .unwrap();
        state
            .store
            .apply_mutation(&Mutation::upsert(EntityKind::Plans, "p2", 0, edit))
            .unwrap();

        state.restore_confirmed(EntityKind::Plans, "p1");
        state.restore_confirmed(EntityKind::Plans, "p2");

        assert_eq!(state.store, state.confirmed);
        assert_eq!(
            state.store.get(EntityKind::Plans, "p1").unwrap().fields["name"],
            json!("Server")
        );
    }
}
