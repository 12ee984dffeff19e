//! Durable storage for the sync engine's local state

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{params, OptionalExtension, Transaction};

use super::Database;
use crate::error::{Error, Result};
use crate::models::{Conflict, Document, EntityKind, Mutation, Record, RefetchKey};
use crate::queue::QueuedMutation;
use crate::state::LocalState;
use crate::store::EntityStore;

const META_DEVICE_ID: &str = "device_id";
const META_CURSOR: &str = "cursor";

const RECORDS_TABLE: &str = "records";
const CONFIRMED_TABLE: &str = "confirmed_records";

/// Storage for [`LocalState`].
///
/// `save` must be atomic: either the whole state is written or none of it.
pub trait SyncPersistence: Send + Sync {
    /// Load the last saved state, `None` on a fresh install
    fn load(&self) -> Result<Option<LocalState>>;

    /// Replace the saved state
    fn save(&self, state: &LocalState) -> Result<()>;
}

/// Process-local persistence, shared between clones.
#[derive(Clone, Default)]
pub struct MemoryPersistence {
    state: Arc<Mutex<Option<LocalState>>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last saved state.
    pub fn snapshot(&self) -> Option<LocalState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl SyncPersistence for MemoryPersistence {
    fn load(&self) -> Result<Option<LocalState>> {
        Ok(self.snapshot())
    }

    fn save(&self, state: &LocalState) -> Result<()> {
        *self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(state.clone());
        Ok(())
    }
}

/// `SQLite` implementation of `SyncPersistence`
pub struct SqliteSyncPersistence {
    db: Mutex<Database>,
}

impl SqliteSyncPersistence {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    /// Open (and migrate) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|_| Error::Database("sync database lock poisoned".to_string()))
    }
}

impl SyncPersistence for SqliteSyncPersistence {
    fn load(&self) -> Result<Option<LocalState>> {
        let db = self.lock()?;
        let conn = db.connection();

        let Some(device_id) = read_meta(conn, META_DEVICE_ID)? else {
            return Ok(None);
        };
        let mut state = LocalState::new(device_id);
        state.cursor = read_meta(conn, META_CURSOR)?;

        read_records(conn, RECORDS_TABLE, &mut state.store)?;
        read_records(conn, CONFIRMED_TABLE, &mut state.confirmed)?;

        let mut stmt = conn.prepare("SELECT body, blocked FROM mutations ORDER BY seq")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i32>(1)? != 0))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (body, blocked) in rows {
            state.queue.push_entry(QueuedMutation {
                mutation: serde_json::from_str::<Mutation>(&body)?,
                blocked,
            });
        }

        let mut stmt = conn.prepare("SELECT body FROM conflicts ORDER BY seq")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for body in rows {
            state.conflicts.push(serde_json::from_str::<Conflict>(&body)?);
        }

        let mut stmt = conn.prepare("SELECT entity, id FROM refetch ORDER BY rowid")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        state.refetch = rows
            .into_iter()
            .filter_map(|(entity, entity_id)| {
                EntityKind::parse(&entity).map(|entity| RefetchKey { entity, entity_id })
            })
            .collect();

        Ok(Some(state))
    }

    fn save(&self, state: &LocalState) -> Result<()> {
        let mut db = self.lock()?;
        let tx = db.connection_mut().transaction()?;
        write_state(&tx, state)?;
        tx.commit()?;
        Ok(())
    }
}

fn write_state(tx: &Transaction<'_>, state: &LocalState) -> Result<()> {
    tx.execute_batch(
        "DELETE FROM records;
         DELETE FROM confirmed_records;
         DELETE FROM mutations;
         DELETE FROM conflicts;
         DELETE FROM refetch;",
    )?;

    write_meta(tx, META_DEVICE_ID, Some(&state.device_id))?;
    write_meta(tx, META_CURSOR, state.cursor.as_deref())?;

    write_records(tx, RECORDS_TABLE, &state.store)?;
    write_records(tx, CONFIRMED_TABLE, &state.confirmed)?;

    let mut stmt =
        tx.prepare("INSERT INTO mutations (seq, op_id, body, blocked) VALUES (?, ?, ?, ?)")?;
    for (seq, entry) in (0_i64..).zip(state.queue.iter()) {
        stmt.execute(params![
            seq,
            entry.mutation.op_id,
            serde_json::to_string(&entry.mutation)?,
            i32::from(entry.blocked),
        ])?;
    }

    let mut stmt = tx.prepare("INSERT INTO conflicts (seq, op_id, body) VALUES (?, ?, ?)")?;
    for (seq, conflict) in (0_i64..).zip(state.conflicts.iter()) {
        stmt.execute(params![seq, conflict.op_id, serde_json::to_string(conflict)?])?;
    }

    let mut stmt = tx.prepare("INSERT OR IGNORE INTO refetch (entity, id) VALUES (?, ?)")?;
    for key in &state.refetch {
        stmt.execute(params![key.entity.as_str(), key.entity_id])?;
    }

    Ok(())
}

fn read_records(conn: &rusqlite::Connection, table: &str, store: &mut EntityStore) -> Result<()> {
    let mut stmt =
        conn.prepare(&format!("SELECT entity, id, version, is_deleted, fields FROM {table}"))?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i32>(3)? != 0,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for (entity, id, version, is_deleted, fields) in rows {
        let Some(kind) = EntityKind::parse(&entity) else {
            tracing::warn!("Skipping stored record {id} of unknown entity kind {entity}");
            continue;
        };
        store.overwrite(
            kind,
            Record {
                id,
                version: u64::try_from(version).unwrap_or(0),
                is_deleted,
                fields: serde_json::from_str::<Document>(&fields)?,
            },
        );
    }
    Ok(())
}

fn write_records(tx: &Transaction<'_>, table: &str, store: &EntityStore) -> Result<()> {
    let mut stmt = tx.prepare(&format!(
        "INSERT INTO {table} (entity, id, version, is_deleted, fields) VALUES (?, ?, ?, ?, ?)"
    ))?;
    for (kind, record) in store.iter() {
        let version = i64::try_from(record.version).map_err(|_| {
            Error::InvalidInput(format!(
                "{kind} {} version {} is too large to store",
                record.id, record.version
            ))
        })?;
        stmt.execute(params![
            kind.as_str(),
            record.id,
            version,
            i32::from(record.is_deleted),
            serde_json::to_string(&record.fields)?,
        ])?;
    }
    Ok(())
}

fn read_meta(conn: &rusqlite::Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT value FROM sync_meta WHERE key = ?",
            params![key],
            |row| row.get(0),
        )
        .optional()?)
}

fn write_meta(tx: &Transaction<'_>, key: &str, value: Option<&str>) -> Result<()> {
    match value {
        Some(value) => tx.execute(
            "INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?, ?)",
            params![key, value],
        )?,
        None => tx.execute("DELETE FROM sync_meta WHERE key = ?", params![key])?,
    };
    Ok(())
}
