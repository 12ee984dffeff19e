//! Bearer token sources for CLI sync.
//!
//! The CLI never signs in by itself: the access token comes from the
//! environment or from a file an external login helper keeps fresh.

use std::path::{Path, PathBuf};

use liftlog_core::sync::{token_provider, SyncError, TokenProvider};

use crate::config_profiles::{normalize_text_option, CliProfile};

pub const ENV_ACCESS_TOKEN: &str = "LIFTLOG_ACCESS_TOKEN";

#[derive(Clone, PartialEq, Eq)]
pub enum TokenSource {
    Env(String),
    File(PathBuf),
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Env(_) => formatter.write_str("Env([REDACTED])"),
            Self::File(path) => formatter.debug_tuple("File").field(path).finish(),
        }
    }
}

impl TokenSource {
    /// `LIFTLOG_ACCESS_TOKEN` wins over the profile's token file.
    pub fn resolve(profile: &CliProfile) -> Option<Self> {
        Self::resolve_with(profile, |key| std::env::var(key).ok())
    }

    pub fn resolve_with(
        profile: &CliProfile,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Option<Self> {
        normalize_text_option(lookup(ENV_ACCESS_TOKEN))
            .map(Self::Env)
            .or_else(|| profile.token_file.clone().map(Self::File))
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Env(_) => format!("${ENV_ACCESS_TOKEN}"),
            Self::File(path) => path.display().to_string(),
        }
    }

    /// The token provider and, for files, a force-refresh provider that
    /// re-reads the file after the server rejects a token.
    pub fn providers(&self) -> (TokenProvider, Option<TokenProvider>) {
        match self {
            Self::Env(token) => {
                let token = token.clone();
                (
                    token_provider(move || {
                        let token = token.clone();
                        async move { Ok(token) }
                    }),
                    None,
                )
            }
            Self::File(path) => (file_provider(path), Some(file_provider(path))),
        }
    }
}

fn file_provider(path: &Path) -> TokenProvider {
    let path = path.to_path_buf();
    token_provider(move || {
        let path = path.clone();
        async move { read_token_file(&path).await }
    })
}

pub async fn read_token_file(path: &Path) -> Result<String, SyncError> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|error| {
        SyncError::Unauthorized(format!(
            "Failed to read token file {}: {error}",
            path.display()
        ))
    })?;
    normalize_text_option(Some(raw)).ok_or_else(|| {
        SyncError::Unauthorized(format!("Token file {} is empty", path.display()))
    })
}
