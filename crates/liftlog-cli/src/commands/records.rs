use crate::commands::common::{
    format_record_lines, normalize_record_id, open_engine, parse_entity, read_document_arg,
    record_to_item, CliContext, EngineMode, RecordItem,
};
use crate::error::CliError;

pub fn run_records(
    context: &CliContext,
    entity: &str,
    include_deleted: bool,
    as_json: bool,
) -> Result<(), CliError> {
    let kind = parse_entity(entity)?;
    let engine = open_engine(context, EngineMode::Local)?;
    let records = if include_deleted {
        engine.all(kind)
    } else {
        engine.active(kind)
    };

    if as_json {
        let items = records.iter().map(record_to_item).collect::<Vec<RecordItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if records.is_empty() {
        println!("No {} records.", kind.label());
    } else {
        for line in format_record_lines(&records) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn run_put(context: &CliContext, entity: &str, document: &str) -> Result<(), CliError> {
    let kind = parse_entity(entity)?;
    let doc = read_document_arg(document)?;
    let engine = open_engine(context, EngineMode::Local)?;

    let record = engine.upsert(kind, doc)?;
    println!("{}", record.id);
    Ok(())
}

pub fn run_delete(context: &CliContext, entity: &str, id: &str) -> Result<(), CliError> {
    let kind = parse_entity(entity)?;
    let id = normalize_record_id(id)?;
    let engine = open_engine(context, EngineMode::Local)?;

    let record = engine.delete(kind, &id)?;
    println!("{}", record.id);
    Ok(())
}
