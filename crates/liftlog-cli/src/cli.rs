use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use liftlog_core::sync::ConflictChoice;

#[derive(Parser)]
#[command(name = "liftlog")]
#[command(about = "Inspect and sync your training log from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// CLI profile name for sync configuration
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show device, queue, and cursor state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List records of one entity kind
    #[command(alias = "ls")]
    Records {
        /// Entity kind, e.g. plans or climb_entries
        entity: String,
        /// Include deleted records
        #[arg(long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create or update a record from a JSON object (`-` reads stdin)
    Put {
        /// Entity kind
        entity: String,
        /// JSON object; include "id" to edit an existing record
        document: String,
    },
    /// Delete a record
    #[command(alias = "rm")]
    Delete {
        /// Entity kind
        entity: String,
        /// Record id
        id: String,
    },
    /// Push pending edits and pull remote changes
    Sync {
        /// Output the cycle report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect and resolve sync conflicts
    Conflicts {
        #[command(subcommand)]
        command: ConflictCommands,
    },
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConflictCommands {
    /// List open conflicts
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve one conflict by operation id
    Resolve {
        /// Operation id shown by `liftlog conflicts list`
        op_id: String,
        /// Which side to keep
        #[arg(long, value_enum)]
        keep: KeepSide,
        /// Run a sync right after resolving
        #[arg(long)]
        sync: bool,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum KeepSide {
    Mine,
    Server,
}

impl From<KeepSide> for ConflictChoice {
    fn from(side: KeepSide) -> Self {
        match side {
            KeepSide::Mine => Self::KeepMine,
            KeepSide::Server => Self::KeepServer,
        }
    }
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update profile config (`--profile` and `--db-path` apply)
    Init {
        /// Sync API base URL
        #[arg(long, value_name = "URL")]
        api_base_url: Option<String>,
        /// File holding the bearer access token
        #[arg(long, value_name = "PATH")]
        token_file: Option<PathBuf>,
        /// Pin the device id instead of generating one
        #[arg(long, value_name = "ID")]
        device_id: Option<String>,
        /// HTTP timeout for sync requests
        #[arg(long, value_name = "SECONDS")]
        request_timeout_secs: Option<u64>,
        /// Keep current active profile instead of activating this one
        #[arg(long)]
        no_activate: bool,
    },
    /// Print the resolved profile
    Show,
}
