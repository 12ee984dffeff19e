//! liftlog-core - Core library for liftlog
//!
//! This crate contains the offline-first sync engine shared by all liftlog
//! clients: the entity record store, the pending mutation queue, the push/pull
//! API client, and the conflict resolution workflow.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod queue;
pub mod state;
pub mod store;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{Conflict, ConflictReason, Document, EntityKind, Mutation, Record};
