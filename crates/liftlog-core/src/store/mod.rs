//! In-memory entity record store
//!
//! The store is this device's view of synced state: one id→record map per
//! entity kind. Pulled changes are applied last-writer-wins on version, local
//! edits are merged in speculatively until the server acknowledges them.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{
    parse_version, ChangeType, Document, EntityKind, Mutation, Operation, PullChange, Record,
};
use crate::util::value_to_identifier;

/// Counts from one `apply_pull_changes` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplySummary {
    pub applied: usize,
    /// Changes older than the version this device already held
    pub skipped_stale: usize,
    /// Changes for entity kinds or change types this build does not know
    pub ignored: usize,
}

/// Keyed store of every synced record on this device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityStore {
    kinds: BTreeMap<EntityKind, BTreeMap<String, Record>>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply server changes in the order given.
    ///
    /// Within a batch a later change for an id overwrites an earlier one. A
    /// change carrying a version below what this device held before the
    /// batch is skipped, so re-applying a batch is a no-op and versions never
    /// go backwards across batches.
    pub fn apply_pull_changes(&mut self, changes: &[PullChange]) -> ApplySummary {
        let mut summary = ApplySummary::default();
        let mut floors: HashMap<(EntityKind, &str), u64> = HashMap::new();

        for change in changes {
            let Some(kind) = EntityKind::parse(&change.entity) else {
                tracing::debug!(
                    entity = %change.entity,
                    entity_id = %change.entity_id,
                    "Ignoring pulled change for unknown entity kind"
                );
                summary.ignored += 1;
                continue;
            };
            let id = change.entity_id.as_str();
            let floor = *floors
                .entry((kind, id))
                .or_insert_with(|| self.version(kind, id));

            match change.change_type {
                ChangeType::Upsert => {
                    let mut doc = change.doc.clone().unwrap_or_default();
                    if !doc.contains_key("version") {
                        if let Some(version) = &change.version {
                            doc.insert("version".to_string(), version.clone());
                        }
                    }
                    match parse_version(doc.get("version")) {
                        Some(version) if version < floor => {
                            summary.skipped_stale += 1;
                            continue;
                        }
                        Some(_) => {}
                        // A versionless upsert keeps the version already held
                        None => {
                            if let Some(existing) = self.get(kind, id) {
                                doc.insert("version".to_string(), Value::from(existing.version));
                            }
                        }
                    }
                    self.overwrite(kind, Record::from_document(id, doc));
                }
                ChangeType::Delete => {
                    let version = parse_version(change.version.as_ref());
                    if version.is_some_and(|version| version < floor) {
                        summary.skipped_stale += 1;
                        continue;
                    }
                    let records = self.kinds.entry(kind).or_default();
                    match records.get_mut(id) {
                        Some(record) => {
                            record.is_deleted = true;
                            if let Some(version) = version {
                                record.version = version;
                            }
                        }
                        None => {
                            records.insert(
                                id.to_string(),
                                Record::tombstone(id, version.unwrap_or(0)),
                            );
                        }
                    }
                }
                ChangeType::Unknown => {
                    summary.ignored += 1;
                    continue;
                }
            }
            summary.applied += 1;
        }

        summary
    }

    /// Speculatively merge a local edit onto the stored record.
    ///
    /// `doc` must carry an `id`. Fields are shallow-merged with incoming
    /// values winning.
    pub fn upsert_local(&mut self, kind: EntityKind, doc: Document) -> Result<Record> {
        let id = doc
            .get("id")
            .and_then(value_to_identifier)
            .ok_or_else(|| Error::InvalidInput(format!("{kind} document is missing an id")))?;

        let records = self.kinds.entry(kind).or_default();
        let record = match records.get_mut(&id) {
            Some(existing) => {
                existing.merge(doc);
                existing.clone()
            }
            None => {
                let record = Record::from_document(id.clone(), doc);
                records.insert(id, record.clone());
                record
            }
        };
        Ok(record)
    }

    /// Replace a record outright, ignoring the version guard.
    pub fn overwrite(&mut self, kind: EntityKind, record: Record) {
        self.kinds
            .entry(kind)
            .or_default()
            .insert(record.id.clone(), record);
    }

    /// Reflect a pending mutation in the store before the server sees it.
    pub fn apply_mutation(&mut self, mutation: &Mutation) -> Result<()> {
        match &mutation.operation {
            Operation::Upsert { payload } => {
                let mut doc = payload.clone();
                doc.insert("id".to_string(), Value::String(mutation.entity_id.clone()));
                self.upsert_local(mutation.entity, doc)?;
            }
            Operation::Delete => {
                let mut doc = Document::new();
                doc.insert("id".to_string(), Value::String(mutation.entity_id.clone()));
                doc.insert("is_deleted".to_string(), Value::Bool(true));
                self.upsert_local(mutation.entity, doc)?;
            }
        }
        Ok(())
    }

    pub fn get(&self, kind: EntityKind, id: &str) -> Option<&Record> {
        self.kinds.get(&kind)?.get(id)
    }

    pub fn remove(&mut self, kind: EntityKind, id: &str) -> Option<Record> {
        let records = self.kinds.get_mut(&kind)?;
        let removed = records.remove(id);
        if records.is_empty() {
            self.kinds.remove(&kind);
        }
        removed
    }

    /// The stored spelling of `id`, matching case-insensitively when there
    /// is no exact match.
    pub fn stored_id(&self, kind: EntityKind, id: &str) -> Option<String> {
        if self.get(kind, id).is_some() {
            return Some(id.to_string());
        }
        self.records(kind)
            .find(|record| record.id.eq_ignore_ascii_case(id))
            .map(|record| record.id.clone())
    }

    /// Non-deleted records in listing order.
    pub fn active(&self, kind: EntityKind) -> Vec<&Record> {
        let mut records = self
            .records(kind)
            .filter(|record| !record.is_deleted)
            .collect::<Vec<_>>();
        records.sort_by(|a, b| Record::listing_order(a, b));
        records
    }

    /// Every record including tombstones, in listing order.
    pub fn all(&self, kind: EntityKind) -> Vec<&Record> {
        let mut records = self.records(kind).collect::<Vec<_>>();
        records.sort_by(|a, b| Record::listing_order(a, b));
        records
    }

    /// Known server version of a record, 0 when absent.
    pub fn version(&self, kind: EntityKind, id: &str) -> u64 {
        self.get(kind, id).map_or(0, |record| record.version)
    }

    /// Every stored record across all kinds, in storage order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityKind, &Record)> {
        self.kinds
            .iter()
            .flat_map(|(kind, records)| records.values().map(move |record| (*kind, record)))
    }

    pub fn len(&self) -> usize {
        self.kinds.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything, e.g. on sign-out.
    pub fn reset(&mut self) {
        self.kinds.clear();
    }

    fn records(&self, kind: EntityKind) -> impl Iterator<Item = &Record> {
        self.kinds.get(&kind).into_iter().flat_map(BTreeMap::values)
    }
}
