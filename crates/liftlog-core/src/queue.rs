//! Pending mutation queue

use serde::{Deserialize, Serialize};

use crate::models::Mutation;

/// A queued mutation and whether a conflict is holding it back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMutation {
    pub mutation: Mutation,
    /// Blocked mutations are skipped by `snapshot` until resolved
    #[serde(default)]
    pub blocked: bool,
}

/// Ordered list of local writes the server has not acknowledged yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationQueue {
    entries: Vec<QueuedMutation>,
}

impl MutationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a mutation at the end of the queue.
    pub fn push(&mut self, mutation: Mutation) {
        self.entries.push(QueuedMutation {
            mutation,
            blocked: false,
        });
    }

    /// Restore a persisted entry as-is.
    pub fn push_entry(&mut self, entry: QueuedMutation) {
        self.entries.push(entry);
    }

    /// Copy of every unblocked mutation, in queue order.
    pub fn snapshot(&self) -> Vec<Mutation> {
        self.pending().cloned().collect()
    }

    pub fn pending(&self) -> impl Iterator<Item = &Mutation> {
        self.entries
            .iter()
            .filter(|entry| !entry.blocked)
            .map(|entry| &entry.mutation)
    }

    pub fn blocked(&self) -> impl Iterator<Item = &Mutation> {
        self.entries
            .iter()
            .filter(|entry| entry.blocked)
            .map(|entry| &entry.mutation)
    }

    pub fn get(&self, op_id: &str) -> Option<&QueuedMutation> {
        self.entries
            .iter()
            .find(|entry| entry.mutation.op_id == op_id)
    }

    /// Remove a mutation, returning it if it was queued.
    pub fn remove(&mut self, op_id: &str) -> Option<Mutation> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.mutation.op_id == op_id)?;
        Some(self.entries.remove(index).mutation)
    }

    /// Hold a mutation back until its conflict is resolved.
    ///
    /// Returns `false` when no mutation with `op_id` is queued.
    pub fn block(&mut self, op_id: &str) -> bool {
        let Some(entry) = self.entry_mut(op_id) else {
            return false;
        };
        entry.blocked = true;
        true
    }

    /// Unblock a mutation so the next cycle pushes it against `base_version`.
    pub fn reissue(&mut self, op_id: &str, base_version: u64) -> Option<&Mutation> {
        let entry = self.entry_mut(op_id)?;
        entry.blocked = false;
        entry.mutation.base_version = base_version;
        Some(&entry.mutation)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedMutation> {
        self.entries.iter()
    }

    pub fn pending_count(&self) -> usize {
        self.pending().count()
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked().count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn entry_mut(&mut self, op_id: &str) -> Option<&mut QueuedMutation> {
        self.entries
            .iter_mut()
            .find(|entry| entry.mutation.op_id == op_id)
    }
}
