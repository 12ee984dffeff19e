//! Database migrations

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: sync state schema
fn migrate_v1(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );
        -- Device id and pull cursor
        CREATE TABLE IF NOT EXISTS sync_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS records (
            entity TEXT NOT NULL,
            id TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 0,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            fields TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (entity, id)
        );
        CREATE TABLE IF NOT EXISTS mutations (
            seq INTEGER PRIMARY KEY,
            op_id TEXT NOT NULL UNIQUE,
            body TEXT NOT NULL,
            blocked INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS conflicts (
            seq INTEGER PRIMARY KEY,
            op_id TEXT NOT NULL UNIQUE,
            body TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS refetch (
            entity TEXT NOT NULL,
            id TEXT NOT NULL,
            PRIMARY KEY (entity, id)
        );
        INSERT INTO schema_version (version) VALUES (1);",
    )?;
    tx.commit()?;

    tracing::info!("Applied sync database migration v1");
    Ok(())
}

/// Migration to version 2: confirmed server copies of records, and conflicts
/// no longer unique by op id
fn migrate_v2(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS confirmed_records (
            entity TEXT NOT NULL,
            id TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 0,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            fields TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (entity, id)
        );
        INSERT OR IGNORE INTO confirmed_records (entity, id, version, is_deleted, fields)
            SELECT entity, id, version, is_deleted, fields FROM records;
        -- Conflicts without an op id share a placeholder
        CREATE TABLE conflicts_v2 (
            seq INTEGER PRIMARY KEY,
            op_id TEXT NOT NULL,
            body TEXT NOT NULL
        );
        INSERT INTO conflicts_v2 (seq, op_id, body) SELECT seq, op_id, body FROM conflicts;
        DROP TABLE conflicts;
        ALTER TABLE conflicts_v2 RENAME TO conflicts;
        INSERT INTO schema_version (version) VALUES (2);",
    )?;
    tx.commit()?;

    tracing::info!("Applied sync database migration v2");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrading_from_v1_seeds_confirmed_records() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate_v1(&mut conn).unwrap();
        conn.execute_batch(
            "INSERT INTO records (entity, id, version, fields) VALUES ('plans', 'p1', 3, '{}');
             INSERT INTO conflicts (seq, op_id, body) VALUES (0, 'op-1', '{}');",
        )
        .unwrap();

        run(&mut conn).unwrap();

        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
        let version: i64 = conn
            .query_row(
                "SELECT version FROM confirmed_records WHERE entity = 'plans' AND id = 'p1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, 3);
        conn.execute(
            "INSERT INTO conflicts (seq, op_id, body) VALUES (1, 'op-1', '{}')",
            [],
        )
        .unwrap();
    }
}
