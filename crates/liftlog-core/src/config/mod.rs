//! Sync endpoint configuration for client apps.
//!
//! Provides a unified `SyncConfig` used by every client to locate the
//! push/pull endpoints and to pin a device identity.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
const DEFAULT_PUSH_PATH: &str = "/sync/push";
const DEFAULT_PULL_PATH: &str = "/sync/pull";

pub const ENV_API_URL: &str = "LIFTLOG_API_URL";
pub const ENV_DEVICE_ID: &str = "LIFTLOG_DEVICE_ID";
pub const ENV_TIMEOUT_SECS: &str = "LIFTLOG_SYNC_TIMEOUT_SECS";

/// Where and how to reach the sync authority.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    pub api_base_url: String,
    /// Fixed device id; generated and persisted on first open when absent
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_push_path")]
    pub push_path: String,
    #[serde(default = "default_pull_path")]
    pub pull_path: String,
}

impl SyncConfig {
    /// Build a config with default paths and timeout.
    pub fn new(api_base_url: impl Into<String>) -> Result<Self, String> {
        Self {
            api_base_url: api_base_url.into(),
            device_id: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            push_path: DEFAULT_PUSH_PATH.to_string(),
            pull_path: DEFAULT_PULL_PATH.to_string(),
        }
        .normalized()
    }

    /// Read the config from `LIFTLOG_*` environment variables.
    ///
    /// Returns `Ok(None)` when no API URL is set.
    pub fn from_env() -> Result<Option<Self>, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`SyncConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Self>, String> {
        let Some(api_base_url) = normalize_text_option(lookup(ENV_API_URL)) else {
            return Ok(None);
        };
        let mut config = Self::new(api_base_url)?;
        config.device_id = normalize_text_option(lookup(ENV_DEVICE_ID));
        if let Some(raw) = normalize_text_option(lookup(ENV_TIMEOUT_SECS)) {
            config.request_timeout_secs = raw
                .parse()
                .map_err(|_| format!("{ENV_TIMEOUT_SECS} must be a whole number of seconds"))?;
        }
        config.normalized().map(Some)
    }

    pub fn push_url(&self) -> String {
        format!("{}{}", self.api_base_url, self.push_path)
    }

    pub fn pull_url(&self) -> String {
        format!("{}{}", self.api_base_url, self.pull_path)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Trim values, validate the base URL, and fill empty paths.
    pub fn normalized(self) -> Result<Self, String> {
        let api_base_url = normalize_text_option(Some(self.api_base_url))
            .ok_or_else(|| "sync field 'api_base_url' is required".to_string())?;
        if !is_http_url(&api_base_url) {
            return Err("sync field 'api_base_url' must include http:// or https://".to_string());
        }
        if self.request_timeout_secs == 0 {
            return Err("sync field 'request_timeout_secs' must be greater than zero".to_string());
        }

        Ok(Self {
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            device_id: normalize_text_option(self.device_id),
            request_timeout_secs: self.request_timeout_secs,
            push_path: normalize_path(self.push_path, DEFAULT_PUSH_PATH),
            pull_path: normalize_path(self.pull_path, DEFAULT_PULL_PATH),
        })
    }
}

const fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_push_path() -> String {
    DEFAULT_PUSH_PATH.to_string()
}

fn default_pull_path() -> String {
    DEFAULT_PULL_PATH.to_string()
}

fn normalize_path(raw: String, fallback: &str) -> String {
    let Some(path) = normalize_text_option(Some(raw)) else {
        return fallback.to_string();
    };
    if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    }
}
