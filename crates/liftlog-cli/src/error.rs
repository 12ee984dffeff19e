use std::io;

use liftlog_core::sync::SyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] liftlog_core::Error),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Unknown entity '{0}'. Expected one of: {1}")]
    UnknownEntity(String, String),
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    #[error("Record id cannot be empty")]
    EmptyRecordId,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "Sync is not configured. Run `liftlog config init --api-base-url <URL> --token-file <PATH>`, or set LIFTLOG_API_URL and LIFTLOG_ACCESS_TOKEN."
    )]
    SyncNotConfigured,
}
