use std::collections::BTreeMap;

use serde::Serialize;

use crate::commands::common::{count_records, open_engine, CliContext, EngineMode};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub profile: String,
    pub db_path: String,
    pub device_id: String,
    pub sync_configured: bool,
    pub cursor: Option<String>,
    pub pending_mutations: usize,
    pub blocked_mutations: usize,
    pub open_conflicts: usize,
    pub refetch_requests: usize,
    /// Active and deleted counts per entity kind
    pub records: BTreeMap<&'static str, (usize, usize)>,
}

pub fn run_status(context: &CliContext, as_json: bool) -> Result<(), CliError> {
    let engine = open_engine(context, EngineMode::Local)?;
    let state = engine.snapshot();
    let report = StatusReport {
        profile: context.profile_name.clone(),
        db_path: context.db_path.display().to_string(),
        device_id: state.device_id.clone(),
        sync_configured: engine.is_configured(),
        cursor: state.cursor.clone(),
        pending_mutations: state.queue.pending_count(),
        blocked_mutations: state.queue.blocked_count(),
        open_conflicts: state.conflicts.len(),
        refetch_requests: state.refetch.len(),
        records: count_records(&engine),
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in format_status_lines(&report) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn format_status_lines(report: &StatusReport) -> Vec<String> {
    let mut lines = vec![
        format!("Profile:    {}", report.profile),
        format!("Database:   {}", report.db_path),
        format!("Device:     {}", report.device_id),
        format!(
            "Sync:       {}",
            if report.sync_configured {
                "configured"
            } else {
                "not configured"
            }
        ),
        format!(
            "Cursor:     {}",
            report.cursor.as_deref().unwrap_or("(never synced)")
        ),
        format!(
            "Queue:      {} pending, {} blocked",
            report.pending_mutations, report.blocked_mutations
        ),
        format!("Conflicts:  {}", report.open_conflicts),
    ];
    for (entity, (active, deleted)) in &report.records {
        lines.push(format!("  {entity:<16} {active} active, {deleted} deleted"));
    }
    lines
}
