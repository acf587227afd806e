//! Command-line configuration.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use strata_core::config::DEFAULT_API_LIST_LIMIT;
use strata_core::EngineConfig;

/// STRATA command-line client
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(version, about = "STRATA schema-driven data engine", long_about = None)]
pub struct Args {
    /// Database file. An in-memory database is used when omitted.
    #[arg(short, long)]
    pub database: Option<PathBuf>,

    /// JSON file holding the list of modules to load.
    #[arg(short, long)]
    pub schema: Option<PathBuf>,

    /// Default page size of `list` (0 = unbounded).
    #[arg(long, default_value_t = DEFAULT_API_LIST_LIMIT)]
    pub api_list_limit: u64,

    #[command(subcommand)]
    pub command: Command,
}

/// Operations run against the opened database.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Synchronize storage with the schema and report the changes.
    Sync,

    /// Print the record stored under a logical key.
    Get {
        /// Entity name.
        entity: String,
        /// Logical key, as a JSON map or a bare value for single-column keys.
        key: String,
    },

    /// Print the records matching a filter.
    List {
        /// Entity name.
        entity: String,
        /// Filter expression, e.g. `name == alice and age > 30`.
        #[arg(long)]
        search: Option<String>,
        /// Comma-separated fields, `-` prefix for descending.
        #[arg(long, allow_hyphen_values = true)]
        order_by: Option<String>,
        /// Page size.
        #[arg(long)]
        limit: Option<u64>,
        /// Records to skip.
        #[arg(long)]
        start: Option<u64>,
    },

    /// Store a record given as a JSON flat map.
    Put {
        /// Entity name.
        entity: String,
        /// Record fields as a JSON object.
        record: String,
        /// Fail instead of updating when the logical key exists.
        #[arg(long)]
        insert: bool,
    },

    /// Delete the record stored under a logical key.
    Delete {
        /// Entity name.
        entity: String,
        /// Logical key, as a JSON map or a bare value for single-column keys.
        key: String,
    },
}

/// Resolved CLI configuration.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Engine settings.
    pub engine: EngineConfig,
    /// Modules file, if any.
    pub schema_path: Option<PathBuf>,
    /// Operation to run.
    pub command: Command,
}

impl Args {
    /// Convert command-line arguments to the CLI configuration.
    pub fn into_config(self) -> CliConfig {
        let mut engine = EngineConfig::in_memory().with_api_list_limit(self.api_list_limit);
        if let Some(path) = self.database {
            engine = engine.with_database_path(path);
        }
        CliConfig {
            engine,
            schema_path: self.schema,
            command: self.command,
        }
    }
}
