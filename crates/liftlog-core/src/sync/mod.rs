//! Push/pull sync engine.
//!
//! `client` speaks the wire protocol, `resolver` turns server conflicts into
//! user decisions, and `engine` runs one push→pull→apply cycle at a time.

mod client;
mod engine;
mod resolver;
mod transport;
mod wire;

#[cfg(test)]
pub(crate) mod testing;

use thiserror::Error;

pub use client::{token_provider, PullOutcome, PushOutcome, SyncApiClient, TokenFuture, TokenProvider};
pub use engine::{SyncEngine, SyncReport};
pub use resolver::{normalize_conflict, resolve, ConflictChoice, Resolution};
pub use transport::{HttpTransport, SyncEndpoint, SyncTransport, TransportResponse};
pub use wire::{
    FailedEntry, PullRequest, PullResponse, PushRequest, PushResponse, RawConflict,
    RejectedMutation,
};

pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that abort a sync cycle or a sync API call.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No usable credential, even after one forced refresh
    #[error("Not authorized: {0}")]
    Unauthorized(String),
    #[error("Sync server returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Sync request failed: {0}")]
    Network(String),
    #[error("Sync request timed out")]
    Timeout,
    #[error("Invalid sync payload: {0}")]
    InvalidPayload(String),
    #[error("Invalid sync configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Sync is not configured for this device")]
    NotConfigured,
    #[error("No open conflict for operation {0}")]
    ConflictNotFound(String),
    #[error(transparent)]
    Store(#[from] crate::Error),
}

/// Broad failure category callers map to user-facing behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorKind {
    /// Prompt for re-authentication
    Unauthorized,
    /// Transient; run the cycle again later
    Transport,
    /// Local misconfiguration, bad input, or storage failure
    Internal,
}

impl SyncError {
    pub const fn kind(&self) -> SyncErrorKind {
        match self {
            Self::Unauthorized(_) => SyncErrorKind::Unauthorized,
            Self::Http { .. } | Self::Network(_) | Self::Timeout | Self::InvalidPayload(_) => {
                SyncErrorKind::Transport
            }
            Self::InvalidConfiguration(_)
            | Self::NotConfigured
            | Self::ConflictNotFound(_)
            | Self::Store(_) => SyncErrorKind::Internal,
        }
    }

    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), SyncErrorKind::Transport)
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(error.to_string())
        }
    }
}
