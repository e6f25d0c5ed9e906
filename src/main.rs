//! Twinstore CLI - inspect and maintain the local manufacturing data store

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use twinstore::config::{self, StoreConfig};

mod commands;

#[derive(Parser)]
#[command(name = "twinstore")]
#[command(version)]
#[command(about = "Versioned local store for process, material and production-line records")]
#[command(long_about = r#"
Twinstore keeps process recipes, materials, product configurations and
production lines in a local, versioned SQLite object store.

Example usage:
  twinstore init
  twinstore seed
  twinstore stats
  twinstore list processes
  twinstore put materials --data '{"id": "mat-001", "name": "Photoresist"}'
  twinstore migrate --legacy localStorage.json --key processes --collection processes
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit machine-readable JSON instead of human output
    #[arg(long, global = true)]
    json: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the database file (overrides the config)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file and ignore the data directory in git
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Show the schema version and record counts per collection
    Stats,

    /// Print every record in a collection
    List {
        /// Collection name
        collection: String,
    },

    /// Print one record by id
    Get {
        /// Collection name
        collection: String,

        /// Record id (numbers are numeric keys, anything else a string key)
        id: String,
    },

    /// Insert or replace records
    Put {
        /// Collection name
        collection: String,

        /// Record (or array of records) as JSON text
        #[arg(long, conflicts_with = "file")]
        data: Option<String>,

        /// File holding a record (or array of records) as JSON
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Delete one record by id
    Delete {
        /// Collection name
        collection: String,

        /// Record id
        id: String,
    },

    /// Remove every record in a collection
    Clear {
        /// Collection name
        collection: String,

        /// Confirm the irreversible clear
        #[arg(long)]
        yes: bool,
    },

    /// Copy records out of a legacy key-value dump
    Migrate {
        /// Legacy dump file (JSON object of key to JSON-encoded string)
        #[arg(short, long)]
        legacy: Option<PathBuf>,

        /// Legacy key holding the array of records
        #[arg(short, long)]
        key: String,

        /// Target collection
        #[arg(long)]
        collection: String,
    },

    /// Load the bundled example data when collections are empty
    Seed {
        /// Load even if every collection already has records
        #[arg(long)]
        force: bool,
    },
}

/// How command results are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl OutputMode {
    pub fn is_human(self) -> bool {
        self == OutputMode::Human
    }
}

/// Print a successful command result as a JSON envelope
pub fn emit_success(mode: OutputMode, command: &str, data: serde_json::Value) -> anyhow::Result<()> {
    if mode == OutputMode::Json {
        let envelope = serde_json::json!({
            "ok": true,
            "command": command,
            "data": data,
        });
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let mode = if cli.json { OutputMode::Json } else { OutputMode::Human };

    let config_path = cli.config;
    let database_override = cli.database;
    let load_store = || -> anyhow::Result<StoreConfig> {
        let mut store_config = config::load_config(config_path.as_deref())?.unwrap_or_default();
        if let Some(database) = &database_override {
            store_config.database = database.clone();
        }
        tracing::debug!("Using database {:?} (version {})", store_config.database, store_config.version);
        Ok(store_config)
    };

    match cli.command {
        Commands::Init { force } => {
            let path = config_path.clone().unwrap_or_else(config::default_config_path);
            commands::run_init(mode, &path, database_override.clone(), force)?
        }
        Commands::Stats => commands::run_stats(mode, &load_store()?.database()).await?,
        Commands::List { collection } => {
            commands::run_list(mode, &load_store()?.database(), &collection).await?
        }
        Commands::Get { collection, id } => {
            commands::run_get(mode, &load_store()?.database(), &collection, &id).await?
        }
        Commands::Put { collection, data, file } => {
            commands::run_put(mode, &load_store()?.database(), &collection, data, file).await?
        }
        Commands::Delete { collection, id } => {
            commands::run_delete(mode, &load_store()?.database(), &collection, &id).await?
        }
        Commands::Clear { collection, yes } => {
            commands::run_clear(mode, &load_store()?.database(), &collection, yes).await?
        }
        Commands::Migrate { legacy, key, collection } => {
            let store_config = load_store()?;
            let legacy = legacy.or_else(|| store_config.legacy.clone());
            commands::run_migrate(mode, &store_config.database(), legacy, &key, &collection).await?
        }
        Commands::Seed { force } => commands::run_seed(mode, &load_store()?.database(), force).await?,
    }

    Ok(())
}
