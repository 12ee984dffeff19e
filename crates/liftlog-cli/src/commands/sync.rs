use crate::commands::common::{format_sync_report, open_engine, CliContext, EngineMode};
use crate::error::CliError;

pub async fn run_sync(context: &CliContext, as_json: bool) -> Result<(), CliError> {
    let engine = open_engine(context, EngineMode::RequireSync)?;
    let report = engine.sync().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in format_sync_report(&report) {
            println!("{line}");
        }
    }
    Ok(())
}
