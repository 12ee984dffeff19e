use std::collections::BTreeMap;
use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

use liftlog_core::db::SqliteSyncPersistence;
use liftlog_core::models::Document;
use liftlog_core::sync::{HttpTransport, SyncApiClient, SyncEngine, SyncReport};
use liftlog_core::{Conflict, EntityKind, Record};
use serde::Serialize;
use serde_json::Value;

use crate::auth::TokenSource;
use crate::config_profiles::{CliProfile, CliProfilesConfig};
use crate::error::CliError;

pub const ENV_DB_PATH: &str = "LIFTLOG_DB_PATH";

/// Resolved profile and database location for one invocation.
#[derive(Debug, Clone)]
pub struct CliContext {
    pub profile_name: String,
    pub profile: CliProfile,
    pub db_path: PathBuf,
}

impl CliContext {
    pub fn load(profile: Option<&str>, db_path: Option<PathBuf>) -> Result<Self, CliError> {
        let config = CliProfilesConfig::load().map_err(CliError::Config)?;
        Ok(Self::from_config(&config, profile, db_path))
    }

    pub fn from_config(
        config: &CliProfilesConfig,
        profile: Option<&str>,
        db_path: Option<PathBuf>,
    ) -> Self {
        let profile_name = config.resolve_profile_name(profile);
        let profile = config.profile(&profile_name).cloned().unwrap_or_default();
        let db_path = resolve_db_path(db_path, &profile);
        Self {
            profile_name,
            profile,
            db_path,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    Local,
    RequireSync,
}

/// Open the local store, wiring in the sync client when configured.
pub fn open_engine(context: &CliContext, mode: EngineMode) -> Result<SyncEngine, CliError> {
    let sync_config = context.profile.sync_config().map_err(CliError::Config)?;
    let token_source = TokenSource::resolve(&context.profile);
    let device_id = sync_config
        .as_ref()
        .and_then(|config| config.device_id.clone());

    let persistence = Arc::new(SqliteSyncPersistence::open(&context.db_path)?);
    let engine = SyncEngine::<HttpTransport>::open(persistence, device_id)?;

    let (Some(config), Some(token_source)) = (sync_config, token_source) else {
        if mode == EngineMode::RequireSync {
            return Err(CliError::SyncNotConfigured);
        }
        return Ok(engine);
    };

    let (provider, force_refresh) = token_source.providers();
    let mut client = SyncApiClient::new(HttpTransport::new(&config)?, provider);
    if let Some(force_refresh) = force_refresh {
        client = client.with_force_refresh(force_refresh);
    }
    tracing::debug!(
        profile = %context.profile_name,
        api = %config.api_base_url,
        token = %token_source.describe(),
        "Sync enabled"
    );
    Ok(engine.with_client(client))
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>, profile: &CliProfile) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os(ENV_DB_PATH).map(PathBuf::from))
        .or_else(|| profile.db_path.clone())
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("liftlog")
        .join("liftlog.db")
}

pub fn parse_entity(value: &str) -> Result<EntityKind, CliError> {
    EntityKind::parse(value).ok_or_else(|| {
        let known = EntityKind::ALL
            .iter()
            .map(|kind| kind.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        CliError::UnknownEntity(value.trim().to_string(), known)
    })
}

pub fn normalize_record_id(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyRecordId)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Parse a JSON object argument; `-` reads it from piped stdin.
pub fn read_document_arg(raw: &str) -> Result<Document, CliError> {
    if raw.trim() == "-" {
        let stdin = io::stdin();
        if stdin.is_terminal() {
            return Err(CliError::InvalidDocument(
                "`-` expects a JSON object on stdin".to_string(),
            ));
        }
        let mut buffer = String::new();
        stdin.lock().read_to_string(&mut buffer)?;
        return parse_document(&buffer);
    }
    parse_document(raw)
}

pub fn parse_document(raw: &str) -> Result<Document, CliError> {
    match serde_json::from_str::<Value>(raw.trim())
        .map_err(|error| CliError::InvalidDocument(error.to_string()))?
    {
        Value::Object(doc) => Ok(doc),
        other => Err(CliError::InvalidDocument(format!(
            "expected a JSON object, got {}",
            json_type_name(&other)
        ))),
    }
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[derive(Debug, Serialize)]
pub struct RecordItem {
    pub id: String,
    pub version: u64,
    pub is_deleted: bool,
    pub fields: Document,
}

pub fn record_to_item(record: &Record) -> RecordItem {
    RecordItem {
        id: record.id.clone(),
        version: record.version,
        is_deleted: record.is_deleted,
        fields: record.fields.clone(),
    }
}

pub fn format_record_lines(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            let short_id = record.id.chars().take(13).collect::<String>();
            let name = record_title(record, 32);
            let updated = record
                .updated_at_millis()
                .map(format_timestamp)
                .unwrap_or_default();
            let deleted = if record.is_deleted { "  [deleted]" } else { "" };
            format!(
                "{short_id:<13}  v{:<4}  {name:<32}  {updated}{deleted}",
                record.version
            )
            .trim_end()
            .to_string()
        })
        .collect()
}

/// The record's `name`, or a compact field summary when it has none.
pub fn record_title(record: &Record, max_chars: usize) -> String {
    let title = record
        .fields
        .get("name")
        .and_then(Value::as_str)
        .map_or_else(
            || Value::Object(record.fields.clone()).to_string(),
            |name| name.split_whitespace().collect::<Vec<_>>().join(" "),
        );

    if title.chars().count() <= max_chars {
        title
    } else {
        let mut truncated = title
            .chars()
            .take(max_chars.saturating_sub(3))
            .collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

#[derive(Debug, Serialize)]
pub struct ConflictItem {
    pub op_id: String,
    pub entity: String,
    pub label: String,
    pub entity_id: String,
    pub server_version: Option<u64>,
    pub reason: String,
    pub summary: String,
    pub has_server_doc: bool,
}

pub fn conflict_to_item(conflict: &Conflict) -> ConflictItem {
    ConflictItem {
        op_id: conflict.op_id.clone(),
        entity: conflict.entity_key().to_string(),
        label: conflict.label().to_string(),
        entity_id: conflict.entity_id.clone(),
        server_version: conflict.server_version,
        reason: conflict.reason.as_str().to_string(),
        summary: conflict.summary(),
        has_server_doc: conflict.server_doc.is_some(),
    }
}

pub fn format_conflict_lines(conflicts: &[Conflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| format!("{}  {}", conflict.op_id, conflict.summary()))
        .collect()
}

pub fn format_sync_report(report: &SyncReport) -> Vec<String> {
    if report.coalesced {
        return vec!["Sync already in progress".to_string()];
    }

    let mut lines = vec![format!(
        "Pushed {} ({} acknowledged), applied {} change(s)",
        report.pushed,
        report.acknowledged.len(),
        report.applied_changes.applied
    )];
    for rejected in &report.rejected {
        let target = match (&rejected.entity, &rejected.entity_id) {
            (Some(entity), Some(id)) => format!("{entity} {id}"),
            _ => rejected.op_id.clone(),
        };
        lines.push(format!(
            "Rejected {target}: {}",
            rejected
                .message
                .as_deref()
                .or(rejected.reason.as_deref())
                .unwrap_or("no reason given")
        ));
    }
    for conflict in &report.conflicts {
        lines.push(format!("Conflict {}  {}", conflict.op_id, conflict.summary()));
    }
    if !report.conflicts.is_empty() {
        lines.push(
            "Resolve with `liftlog conflicts resolve <op-id> --keep mine|server`".to_string(),
        );
    }
    lines
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M UTC").to_string(),
    )
}

/// Record counts per entity kind, active and deleted, skipping empty kinds.
pub fn count_records(engine: &SyncEngine) -> BTreeMap<&'static str, (usize, usize)> {
    EntityKind::ALL
        .iter()
        .filter_map(|kind| {
            let all = engine.all(*kind);
            if all.is_empty() {
                return None;
            }
            let deleted = all.iter().filter(|record| record.is_deleted).count();
            Some((kind.as_str(), (all.len() - deleted, deleted)))
        })
        .collect()
}
