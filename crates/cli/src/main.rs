mod commands;
mod config;
mod logging;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::migrate;
use config::{AppConfig, Overrides};

#[derive(Parser)]
#[command(name = "tidemark")]
#[command(about = "Reconcile a database's schema version with a directory of SQL migrations")]
#[command(version)]
struct Cli {
    /// Directory holding <version>_<name>.sql files
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Database connection URL (overrides DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Version history table name
    #[arg(long, global = true)]
    table: Option<String>,

    /// Write rollback scripts recovered from the version table to this directory
    #[arg(long, global = true)]
    dump_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Move the database to the highest version in the migrations directory
    Reconcile,

    /// Apply pending migrations
    Up {
        /// Stop after this version
        #[arg(long)]
        to: Option<i64>,
    },

    /// Revert applied migrations (the latest one by default)
    Down {
        /// Revert until the database is at or below this version
        #[arg(long)]
        to: Option<i64>,
    },

    /// Show migration status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the current database version
    Version,

    /// Create a new migration file
    Create {
        /// Migration name
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::from_env()?.with_overrides(Overrides {
        database_url: cli.database_url,
        migrations_dir: cli.dir,
        table: cli.table,
        dump_dir: cli.dump_dir,
    });
    config.validate()?;

    logging::init_logging(&config.logging).map_err(|e| anyhow::anyhow!(e))?;

    match cli.command {
        Commands::Reconcile => migrate::reconcile(&config).await?,
        Commands::Up { to } => migrate::up(&config, to).await?,
        Commands::Down { to } => migrate::down(&config, to).await?,
        Commands::Status { json } => migrate::status(&config, json).await?,
        Commands::Version => migrate::version(&config).await?,
        Commands::Create { name } => migrate::create(&config, &name)?,
    }

    Ok(())
}
