use std::env;
use std::path::PathBuf;

use liftlog_core::config::{ENV_API_URL, ENV_DEVICE_ID};
use liftlog_core::util::is_http_url;
use serde::Serialize;

use crate::auth::TokenSource;
use crate::cli::ConfigCommands;
use crate::commands::common::resolve_db_path;
use crate::config_profiles::{normalize_text_option, CliProfile, CliProfilesConfig};
use crate::error::CliError;

pub fn run_config(
    command: ConfigCommands,
    global_profile: Option<&str>,
    global_db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            api_base_url,
            token_file,
            device_id,
            request_timeout_secs,
            no_activate,
        } => run_config_init(
            global_profile,
            ProfileUpdate {
                api_base_url,
                token_file,
                device_id,
                db_path: global_db_path,
                request_timeout_secs,
            },
            no_activate,
        ),
        ConfigCommands::Show => run_config_show(global_profile, global_db_path),
    }
}

/// Values passed to `config init`; unset fields keep what the profile has.
#[derive(Debug, Default)]
pub struct ProfileUpdate {
    pub api_base_url: Option<String>,
    pub token_file: Option<PathBuf>,
    pub device_id: Option<String>,
    pub db_path: Option<PathBuf>,
    pub request_timeout_secs: Option<u64>,
}

pub fn run_config_init(
    profile_name: Option<&str>,
    update: ProfileUpdate,
    no_activate: bool,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile_name);
    let existing = config.profile(&profile_name).cloned().unwrap_or_default();

    let merged = merge_profile(existing, update, |key| env::var(key).ok())?;
    *config.profile_mut_or_default(&profile_name) = merged;

    if !no_activate {
        config.active_profile = Some(profile_name.clone());
    }

    let path = config.save().map_err(CliError::Config)?;
    println!("Profile '{profile_name}' initialized at {}", path.display());

    let profile = config
        .profile(&profile_name)
        .ok_or_else(|| CliError::Config("Failed to persist profile".to_string()))?;
    let missing = missing_fields(profile);
    if missing.is_empty() {
        println!("Profile '{profile_name}' is ready. Run `liftlog sync`.");
    } else {
        println!("Profile '{profile_name}' is missing: {}", missing.join(", "));
    }
    Ok(())
}

/// Explicit values win, then `LIFTLOG_*` variables, then the stored profile.
pub fn merge_profile(
    existing: CliProfile,
    update: ProfileUpdate,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<CliProfile, CliError> {
    let api_base_url = normalize_text_option(update.api_base_url)
        .or_else(|| normalize_text_option(lookup(ENV_API_URL)))
        .or(existing.api_base_url)
        .map(|url| url.trim_end_matches('/').to_string());
    if let Some(url) = api_base_url.as_deref() {
        if !is_http_url(url) {
            return Err(CliError::Config(
                "api_base_url must include http:// or https://".to_string(),
            ));
        }
    }
    if update.request_timeout_secs == Some(0) {
        return Err(CliError::Config(
            "request_timeout_secs must be greater than zero".to_string(),
        ));
    }

    Ok(CliProfile {
        api_base_url,
        device_id: normalize_text_option(update.device_id)
            .or_else(|| normalize_text_option(lookup(ENV_DEVICE_ID)))
            .or(existing.device_id),
        token_file: update
            .token_file
            .filter(|path| !path.as_os_str().is_empty())
            .or(existing.token_file),
        db_path: update.db_path.or(existing.db_path),
        request_timeout_secs: update.request_timeout_secs.or(existing.request_timeout_secs),
    })
}

pub fn missing_fields(profile: &CliProfile) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if profile.api_base_url.is_none() {
        missing.push("api_base_url");
    }
    if profile.token_file.is_none() {
        missing.push("token_file");
    }
    missing
}

#[derive(Debug, Serialize)]
struct ResolvedProfile<'a> {
    profile: &'a str,
    #[serde(flatten)]
    settings: &'a CliProfile,
    resolved_db_path: PathBuf,
    token_source: Option<String>,
}

fn run_config_show(profile_name: Option<&str>, db_path: Option<PathBuf>) -> Result<(), CliError> {
    let config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile_name);
    let profile = config.profile(&profile_name).cloned().unwrap_or_default();

    let resolved = ResolvedProfile {
        profile: &profile_name,
        settings: &profile,
        resolved_db_path: resolve_db_path(db_path, &profile),
        token_source: TokenSource::resolve(&profile).map(|source| source.describe()),
    };
    println!("{}", serde_json::to_string_pretty(&resolved)?);
    Ok(())
}
