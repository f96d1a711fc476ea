use anyhow::Context;
use tracing::debug;
use tidemark_migrate::{
    Dialect, MigrationCatalog, MigrationStatus, Migrator, Outcome, PostgresBackend, StatusEntry,
    Version, VersionTable,
};

use crate::config::AppConfig;

async fn connect(config: &AppConfig) -> anyhow::Result<Migrator<PostgresBackend>> {
    let url = config.database_url()?;
    let dialect = config.dialect()?;
    let table = VersionTable::new(dialect, config.table.clone())?;
    let backend = PostgresBackend::connect(url, table)
        .await
        .context("Failed to connect to the database")?;
    debug!(
        "Using migrations in {} with version table {}",
        config.migrations_dir.display(),
        backend.table().name()
    );
    Ok(Migrator::new(backend, dialect, config.migration_config()))
}

pub async fn reconcile(config: &AppConfig) -> anyhow::Result<()> {
    let migrator = connect(config).await?;
    let outcome = migrator.reconcile().await?;
    println!("{}", describe(&outcome));
    Ok(())
}

pub async fn up(config: &AppConfig, to: Option<Version>) -> anyhow::Result<()> {
    let migrator = connect(config).await?;
    let result = match to {
        Some(target) => migrator.up_to(target).await?,
        None => migrator.up().await?,
    };

    if result.applied_migrations.is_empty() {
        println!("No migrations to run. Current version: {}", result.from);
    } else {
        println!(
            "Applied {} migration(s): {} -> {} ({} ms)",
            result.applied_migrations.len(),
            result.from,
            result.to,
            result.execution_time_ms
        );
    }
    Ok(())
}

pub async fn down(config: &AppConfig, to: Option<Version>) -> anyhow::Result<()> {
    let migrator = connect(config).await?;
    match to {
        Some(target) => {
            let result = migrator.down_to(target).await?;
            println!(
                "Reverted {} migration(s): {} -> {} ({} ms)",
                result.rolled_back_count(),
                result.from,
                result.to,
                result.execution_time_ms
            );
        }
        None => match migrator.down().await? {
            Some(version) => println!("Reverted version {}", version),
            None => println!("Nothing to revert. Database is at version 0"),
        },
    }
    Ok(())
}

pub async fn status(config: &AppConfig, json: bool) -> anyhow::Result<()> {
    let migrator = connect(config).await?;
    let entries = migrator.status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        print!("{}", format_status(&entries));
    }
    Ok(())
}

pub async fn version(config: &AppConfig) -> anyhow::Result<()> {
    let migrator = connect(config).await?;
    println!("{}", migrator.version().await?);
    Ok(())
}

/// File creation needs no database connection
pub fn create(config: &AppConfig, name: &str) -> anyhow::Result<()> {
    let path = MigrationCatalog::new(config.migrations_dir.clone(), Dialect::Postgres).create(name)?;
    println!("Created migration: {}", path.display());
    Ok(())
}

fn describe(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Converged { version } => {
            format!("Database is up to date at version {}", version)
        }
        Outcome::MigratedUp(result) => format!(
            "Migrated up {} -> {}: applied {:?} ({} ms)",
            result.from, result.to, result.applied_migrations, result.execution_time_ms
        ),
        Outcome::MigratedDown(result) if result.reapplied_migrations.is_empty() => format!(
            "Migrated down {} -> {}: recovered {:?}, reverted {:?} ({} ms)",
            result.from,
            result.to,
            result.recovered_migrations,
            result.rolled_back_migrations,
            result.execution_time_ms
        ),
        Outcome::MigratedDown(result) => format!(
            "Migrated down {} -> {}: recovered {:?}, reverted {:?}, re-applied {:?} ({} ms)",
            result.from,
            result.to,
            result.recovered_migrations,
            result.rolled_back_migrations,
            result.reapplied_migrations,
            result.execution_time_ms
        ),
    }
}

fn format_status(entries: &[StatusEntry]) -> String {
    let mut out = String::from("Migration Status:\n================\n");
    if entries.is_empty() {
        out.push_str("No migrations found\n");
        return out;
    }

    for entry in entries {
        let state = match &entry.status {
            MigrationStatus::Applied {
                applied_at: Some(at),
            } => format!("applied {}", at.format("%Y-%m-%d %H:%M:%S")),
            MigrationStatus::Applied { applied_at: None } => "applied".to_string(),
            MigrationStatus::Pending => "pending".to_string(),
        };
        out.push_str(&format!("  {:<16} {:<24} {}\n", entry.version, state, entry.name));
    }
    out
}
