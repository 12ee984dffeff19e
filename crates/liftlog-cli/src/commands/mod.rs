pub mod common;
pub mod config;
pub mod conflicts;
pub mod records;
pub mod status;
pub mod sync;

use crate::cli::{Cli, Commands, ConflictCommands};
use crate::error::CliError;

use self::common::CliContext;

pub async fn dispatch(cli: Cli) -> Result<(), CliError> {
    if let Commands::Config { command } = cli.command {
        return config::run_config(command, cli.profile.as_deref(), cli.db_path);
    }

    let context = CliContext::load(cli.profile.as_deref(), cli.db_path)?;
    match cli.command {
        Commands::Status { json } => status::run_status(&context, json),
        Commands::Records { entity, all, json } => {
            records::run_records(&context, &entity, all, json)
        }
        Commands::Put { entity, document } => records::run_put(&context, &entity, &document),
        Commands::Delete { entity, id } => records::run_delete(&context, &entity, &id),
        Commands::Sync { json } => sync::run_sync(&context, json).await,
        Commands::Conflicts { command } => match command {
            ConflictCommands::List { json } => conflicts::run_list(&context, json),
            ConflictCommands::Resolve { op_id, keep, sync } => {
                conflicts::run_resolve(&context, &op_id, keep.into(), sync).await
            }
        },
        Commands::Config { .. } => Ok(()),
    }
}
