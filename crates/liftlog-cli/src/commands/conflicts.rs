use liftlog_core::sync::{ConflictChoice, Resolution};

use crate::commands::common::{
    conflict_to_item, format_conflict_lines, format_sync_report, open_engine, CliContext,
    ConflictItem, EngineMode,
};
use crate::error::CliError;

pub fn run_list(context: &CliContext, as_json: bool) -> Result<(), CliError> {
    let engine = open_engine(context, EngineMode::Local)?;
    let conflicts = engine.conflicts();

    if as_json {
        let items = conflicts
            .iter()
            .map(conflict_to_item)
            .collect::<Vec<ConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No open sync conflicts.");
        return Ok(());
    }

    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_resolve(
    context: &CliContext,
    op_id: &str,
    choice: ConflictChoice,
    then_sync: bool,
) -> Result<(), CliError> {
    let mode = if then_sync {
        EngineMode::RequireSync
    } else {
        EngineMode::Local
    };
    let engine = open_engine(context, mode)?;

    if then_sync {
        let (resolution, report) = engine.resolve_and_sync(op_id, choice).await?;
        println!("{}", describe_resolution(&resolution));
        for line in format_sync_report(&report) {
            println!("{line}");
        }
    } else {
        let resolution = engine.resolve(op_id, choice)?;
        println!("{}", describe_resolution(&resolution));
    }
    Ok(())
}

pub fn describe_resolution(resolution: &Resolution) -> String {
    match resolution {
        Resolution::Reissued {
            op_id,
            base_version,
        } => format!("Kept local change {op_id}; it will be pushed against version {base_version}"),
        Resolution::Discarded {
            op_id,
            server_doc_applied: true,
        } => format!("Discarded local change {op_id}; server copy applied"),
        Resolution::Discarded { op_id, .. } => {
            format!("Discarded local change {op_id}; server copy will arrive on next sync")
        }
        Resolution::Dismissed { op_id } => {
            format!("Dismissed conflict {op_id}; the local change was no longer queued")
        }
    }
}
