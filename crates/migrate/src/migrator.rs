//! Migrator - entry point tying a backend, the catalog and the engine together
//!
//! Every operation reads live state first (current version, catalog contents)
//! and wraps lookup failures with the operation that needed them.

use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

use crate::catalog::MigrationCatalog;
use crate::definitions::{
    Migration, MigrationConfig, MigrationRunResult, MigrationStatus, Outcome, RollbackResult,
    StatusEntry, Version,
};
use crate::dialect::Dialect;
use crate::engine::ReconciliationEngine;
use crate::error::{MigrateError, MigrateResult, Operation};
use crate::recovery::DirectorySink;
use crate::runner::{MigrationBackend, MigrationRunner};

pub struct Migrator<B> {
    backend: B,
    catalog: MigrationCatalog,
    config: MigrationConfig,
    dialect: Dialect,
}

impl<B: MigrationBackend> Migrator<B> {
    pub fn new(backend: B, dialect: Dialect, config: MigrationConfig) -> Self {
        let catalog = MigrationCatalog::new(config.migrations_dir.clone(), dialect);
        Self {
            backend,
            catalog,
            config,
            dialect,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn catalog(&self) -> &MigrationCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Converge the database on the catalog's top version, in whichever direction
    pub async fn reconcile(&self) -> MigrateResult<Outcome> {
        let current = self.current_version().await?;
        let migrations = self.collect()?;

        let sink = self.config.dump_dir.as_ref().map(DirectorySink::new);
        let mut engine = ReconciliationEngine::new(&self.backend, self.dialect);
        if let Some(sink) = &sink {
            engine = engine.with_sink(sink);
        }
        engine.reconcile(current, &migrations).await
    }

    /// Apply every pending migration
    pub async fn up(&self) -> MigrateResult<MigrationRunResult> {
        self.up_to(self.config.max_version).await
    }

    /// Apply pending migrations up to and including `target`
    pub async fn up_to(&self, target: Version) -> MigrateResult<MigrationRunResult> {
        let started = Instant::now();
        let current = self.current_version().await?;
        let migrations = self.collect()?;

        let applied = MigrationRunner::new(&self.backend)
            .up_to(current, &migrations, target)
            .await
            .map_err(|e| e.context(Operation::ForwardRun, format!("migrating {} -> {}", current, target)))?;

        let to = applied.last().copied().unwrap_or(current);
        if applied.is_empty() {
            info!("No migrations to run. Current version: {}", current);
        }
        Ok(MigrationRunResult {
            from: current,
            to,
            applied_migrations: applied,
            execution_time_ms: started.elapsed().as_millis(),
        })
    }

    /// Revert the current version only
    pub async fn down(&self) -> MigrateResult<Option<Version>> {
        self.ensure_version_table().await?;
        let migrations = self.collect()?;
        MigrationRunner::new(&self.backend)
            .down_one(&migrations)
            .await
            .map_err(|e| e.context(Operation::RevertRun, "reverting the current version"))
    }

    /// Revert catalog-backed versions until the database is at or below `target`
    pub async fn down_to(&self, target: Version) -> MigrateResult<RollbackResult> {
        let started = Instant::now();
        let current = self.current_version().await?;
        let migrations = self.collect()?;

        let rolled_back = MigrationRunner::new(&self.backend)
            .down_to(target, &migrations)
            .await
            .map_err(|e| e.context(Operation::RevertRun, format!("reverting {} -> {}", current, target)))?;

        let to = self.current_version().await?;
        Ok(RollbackResult {
            from: current,
            to,
            recovered_migrations: Vec::new(),
            rolled_back_migrations: rolled_back,
            reapplied_migrations: Vec::new(),
            execution_time_ms: started.elapsed().as_millis(),
        })
    }

    /// Current version recorded in the version table
    pub async fn version(&self) -> MigrateResult<Version> {
        self.current_version().await
    }

    /// Catalog entries joined with their recorded state
    pub async fn status(&self) -> MigrateResult<Vec<StatusEntry>> {
        self.ensure_version_table().await?;
        let history = self.backend.history().await.map_err(|e| {
            e.context(
                Operation::CurrentVersionLookup,
                format!("reading {}", self.config.migrations_table),
            )
        })?;
        let migrations = self.collect()?;

        Ok(migrations
            .into_iter()
            .map(|migration| {
                let status = match history.latest(migration.version) {
                    Some(record) if record.is_applied => MigrationStatus::Applied {
                        applied_at: record.tstamp,
                    },
                    _ => MigrationStatus::Pending,
                };
                StatusEntry {
                    version: migration.version,
                    name: migration.name,
                    status,
                }
            })
            .collect())
    }

    /// Create a new migration file in the configured directory
    pub fn create(&self, name: &str) -> MigrateResult<PathBuf> {
        let path = self.catalog.create(name)?;
        info!("Created migration {}", path.display());
        Ok(path)
    }

    async fn ensure_version_table(&self) -> MigrateResult<()> {
        self.backend.ensure_version_table().await.map_err(|e| {
            e.context(
                Operation::CurrentVersionLookup,
                format!("preparing {}", self.config.migrations_table),
            )
        })
    }

    async fn current_version(&self) -> MigrateResult<Version> {
        self.ensure_version_table().await?;
        self.backend.current_version().await.map_err(|e| {
            e.context(
                Operation::CurrentVersionLookup,
                format!("reading {}", self.config.migrations_table),
            )
        })
    }

    fn collect(&self) -> MigrateResult<Vec<Migration>> {
        let (min, max) = (self.config.min_version, self.config.max_version);
        if min > max {
            return Err(MigrateError::configuration(format!(
                "minimum version {} is above maximum version {}",
                min, max
            )));
        }
        self.catalog.collect(min, max).map_err(|e| {
            e.context(
                Operation::CatalogCollection,
                format!("{} versions {} -> {}", self.catalog.dir().display(), min, max),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::Direction;
    use crate::testing::{applied, MemoryBackend};
    use std::fs;
    use tempfile::TempDir;

    fn write_migration(dir: &TempDir, version: Version) {
        fs::write(
            dir.path().join(format!("{}_table_{}.sql", version, version)),
            format!(
                "-- Up migration\nCREATE TABLE t{v} (id INT);\n-- Down migration\nDROP TABLE t{v};\n",
                v = version
            ),
        )
        .unwrap();
    }

    fn migrator(dir: &TempDir, backend: MemoryBackend) -> Migrator<MemoryBackend> {
        let config = MigrationConfig {
            migrations_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        Migrator::new(backend, Dialect::Postgres, config)
    }

    #[tokio::test]
    async fn test_reconcile_applies_files_and_records_rollback_scripts() {
        let dir = TempDir::new().unwrap();
        for version in 1..=3 {
            write_migration(&dir, version);
        }
        let migrator = migrator(&dir, MemoryBackend::new());

        let outcome = migrator.reconcile().await.unwrap();
        assert_eq!(outcome.final_version(), 3);
        assert_eq!(migrator.version().await.unwrap(), 3);

        let records = migrator.backend().records();
        let last = records.last().unwrap();
        assert_eq!(last.version_id, 3);
        assert_eq!(
            last.down_data.as_deref(),
            Some("-- Down migration\nDROP TABLE t3;\n")
        );

        // A second run has nothing to do.
        assert!(migrator.reconcile().await.unwrap().is_converged());
    }

    #[tokio::test]
    async fn test_reconcile_recovers_after_catalog_is_pruned() {
        let dir = TempDir::new().unwrap();
        write_migration(&dir, 1);
        let backend = MemoryBackend::with_applied(&[applied(1), applied(2), applied(3)]);
        let dump = TempDir::new().unwrap();

        let mut migrator = migrator(&dir, backend);
        migrator.config.dump_dir = Some(dump.path().to_path_buf());

        match migrator.reconcile().await.unwrap() {
            Outcome::MigratedDown(result) => {
                assert_eq!(result.recovered_migrations, vec![3, 2]);
                assert!(result.rolled_back_migrations.is_empty());
            }
            other => panic!("expected a downward run, got {:?}", other),
        }
        assert_eq!(migrator.version().await.unwrap(), 1);
        assert!(dump.path().join("3_down_version.sql").exists());
        assert!(dump.path().join("2_down_version.sql").exists());
    }

    #[tokio::test]
    async fn test_misnamed_file_is_reported_as_catalog_collection() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.sql"), "-- Up migration\n").unwrap();
        let migrator = migrator(&dir, MemoryBackend::new());

        let err = migrator.reconcile().await.unwrap_err();
        assert_eq!(err.operation(), Some(Operation::CatalogCollection));
        assert!(matches!(err.root(), MigrateError::Catalog { .. }));
    }

    #[tokio::test]
    async fn test_up_to_and_down_to() {
        let dir = TempDir::new().unwrap();
        for version in 1..=4 {
            write_migration(&dir, version);
        }
        let migrator = migrator(&dir, MemoryBackend::new());

        let up = migrator.up_to(2).await.unwrap();
        assert_eq!(up.applied_migrations, vec![1, 2]);
        assert_eq!(up.to, 2);

        let up = migrator.up().await.unwrap();
        assert_eq!(up.applied_migrations, vec![3, 4]);

        let down = migrator.down_to(1).await.unwrap();
        assert_eq!(down.rolled_back_migrations, vec![4, 3, 2]);
        assert_eq!(down.rolled_back_count(), 3);
        assert_eq!(migrator.version().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_down_to_reports_the_version_actually_reached() {
        let dir = TempDir::new().unwrap();
        write_migration(&dir, 1);
        write_migration(&dir, 5);
        let migrator = migrator(&dir, MemoryBackend::with_applied(&[applied(1), applied(5)]));

        let down = migrator.down_to(3).await.unwrap();

        assert_eq!(down.rolled_back_migrations, vec![5]);
        assert_eq!(down.to, 1);
        assert_eq!(migrator.version().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_down_reverts_one_version() {
        let dir = TempDir::new().unwrap();
        for version in 1..=2 {
            write_migration(&dir, version);
        }
        let migrator = migrator(&dir, MemoryBackend::new());
        migrator.up().await.unwrap();

        assert_eq!(migrator.down().await.unwrap(), Some(2));
        assert_eq!(migrator.down().await.unwrap(), Some(1));
        assert_eq!(migrator.down().await.unwrap(), None);
        assert_eq!(
            migrator.backend().executions(),
            vec![
                (1, Direction::Up),
                (2, Direction::Up),
                (2, Direction::Down),
                (1, Direction::Down)
            ]
        );
    }

    #[tokio::test]
    async fn test_down_without_definition_names_the_version() {
        let dir = TempDir::new().unwrap();
        write_migration(&dir, 1);
        let migrator = migrator(&dir, MemoryBackend::with_applied(&[applied(1), applied(2)]));

        let err = migrator.down().await.unwrap_err();
        assert_eq!(err.operation(), Some(Operation::RevertRun));
        assert!(matches!(err.root(), MigrateError::MissingDefinition { version: 2 }));
    }

    #[tokio::test]
    async fn test_status_joins_catalog_and_history() {
        let dir = TempDir::new().unwrap();
        for version in 1..=3 {
            write_migration(&dir, version);
        }
        let migrator = migrator(&dir, MemoryBackend::with_applied(&[applied(1), applied(2)]));
        migrator.backend().record(2, false, None);

        let status = migrator.status().await.unwrap();
        let states: Vec<(Version, bool)> = status
            .iter()
            .map(|entry| (entry.version, matches!(entry.status, MigrationStatus::Applied { .. })))
            .collect();
        assert_eq!(states, vec![(1, true), (2, false), (3, false)]);
        assert_eq!(status[0].name, "table 1");
    }

    #[tokio::test]
    async fn test_inverted_version_range_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut migrator = migrator(&dir, MemoryBackend::new());
        migrator.config.min_version = 10;
        migrator.config.max_version = 5;

        let err = migrator.up().await.unwrap_err();
        assert!(matches!(err, MigrateError::Configuration { .. }));
    }
}
