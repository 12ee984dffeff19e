//! Database layer for liftlog

mod connection;
mod migrations;
mod persistence;

pub use connection::Database;
pub use persistence::{MemoryPersistence, SqliteSyncPersistence, SyncPersistence};
