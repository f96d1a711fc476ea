//! Migration Rollback Recovery
//!
//! When the database records versions the catalog no longer has, the only way
//! back is the rollback script stored with each applied row. Recovery walks the
//! history newest version first and reverts each version as soon as its script
//! is parsed, so a bad payload further down never hides reverts that already
//! succeeded.

use async_trait::async_trait;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::definitions::{MigrationRecord, Version};
use crate::dialect::Dialect;
use crate::error::{MigrateError, MigrateResult};
use crate::parser::parse_rollback_script;
use crate::runner::{ExecutableMigration, MigrationBackend};

/// File name suffix of dumped rollback scripts
pub const RECOVERED_SCRIPT_SUFFIX: &str = "_down_version.sql";

/// Destination for recovered rollback scripts, written before each revert runs
#[async_trait]
pub trait RecoverySink: Send + Sync {
    async fn persist(&self, version: Version, script: &str) -> MigrateResult<()>;
}

/// Writes recovered scripts to `<dir>/<version>_down_version.sql`
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, version: Version) -> PathBuf {
        self.dir.join(format!("{}{}", version, RECOVERED_SCRIPT_SUFFIX))
    }
}

#[async_trait]
impl RecoverySink for DirectorySink {
    async fn persist(&self, version: Version, script: &str) -> MigrateResult<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(version);
        fs::write(&path, script)?;
        debug!("Wrote recovered rollback script to {}", path.display());
        Ok(())
    }
}

/// Reverts versions from the rollback scripts recorded in the version table
pub struct RollbackRecovery<'a, B: ?Sized> {
    backend: &'a B,
    dialect: Dialect,
    sink: Option<&'a dyn RecoverySink>,
}

impl<'a, B: MigrationBackend + ?Sized> RollbackRecovery<'a, B> {
    pub fn new(backend: &'a B, dialect: Dialect) -> Self {
        Self {
            backend,
            dialect,
            sink: None,
        }
    }

    /// Also hand every recovered script to `sink` before reverting its version
    pub fn with_sink(mut self, sink: &'a dyn RecoverySink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Revert every applied version `>= from`, highest first.
    ///
    /// Returns the reverted versions in the order they ran. The walk ends at the
    /// first row below `from` or at the baseline row.
    pub async fn recover(&self, from: Version) -> MigrateResult<Vec<Version>> {
        let history = self.backend.history().await?;
        let mut reverted = Vec::new();

        for record in history.latest_desc() {
            if record.version_id < from || record.version_id == 0 {
                break;
            }
            if !record.is_applied {
                debug!("Version {} is already reverted", record.version_id);
                continue;
            }

            let (script, migration) = self.materialize(record)?;
            if let Some(sink) = self.sink {
                sink.persist(record.version_id, script).await?;
            }

            warn!(
                "Reverting version {} from its recorded rollback script",
                record.version_id
            );
            self.backend.execute(&migration).await?;
            info!("OK   {} (recovered)", record.version_id);
            reverted.push(record.version_id);
        }

        Ok(reverted)
    }

    fn materialize<'r>(
        &self,
        record: &'r MigrationRecord,
    ) -> MigrateResult<(&'r str, ExecutableMigration)> {
        let version = record.version_id;
        let script = record
            .down_data
            .as_deref()
            .ok_or_else(|| MigrateError::recovery_parse(version, "no rollback script recorded"))?;
        let parsed = parse_rollback_script(script, self.dialect)
            .map_err(|e| MigrateError::recovery_parse(version, e.to_string()))?;
        Ok((script, ExecutableMigration::recovered(version, parsed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::Direction;
    use crate::testing::{applied, applied_with, down_data, MemoryBackend};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingSink {
        persisted: Mutex<Vec<Version>>,
    }

    #[async_trait]
    impl RecoverySink for RecordingSink {
        async fn persist(&self, version: Version, _script: &str) -> MigrateResult<()> {
            self.persisted.lock().unwrap().push(version);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_recover_reverts_descending_down_to_floor() {
        let backend =
            MemoryBackend::with_applied(&[applied(1), applied(3), applied(4), applied(5)]);

        let reverted = RollbackRecovery::new(&backend, Dialect::Postgres)
            .recover(3)
            .await
            .unwrap();

        assert_eq!(reverted, vec![5, 4, 3]);
        assert_eq!(
            backend.executions(),
            vec![(5, Direction::Down), (4, Direction::Down), (3, Direction::Down)]
        );
        assert_eq!(
            backend.statements(),
            vec!["DROP TABLE t5;", "DROP TABLE t4;", "DROP TABLE t3;"]
        );
        assert_eq!(backend.current(), 1);
    }

    #[tokio::test]
    async fn test_recover_stops_at_baseline_row() {
        let backend = MemoryBackend::with_applied(&[applied(1)]);

        let reverted = RollbackRecovery::new(&backend, Dialect::Postgres)
            .recover(0)
            .await
            .unwrap();

        assert_eq!(reverted, vec![1]);
        assert_eq!(backend.executions(), vec![(1, Direction::Down)]);
    }

    #[tokio::test]
    async fn test_recover_stops_before_parsing_rows_below_floor() {
        // Version 2 carries garbage; it must never be looked at.
        let backend = MemoryBackend::with_applied(&[applied_with(2, "not a script"), applied(3)]);

        let reverted = RollbackRecovery::new(&backend, Dialect::Postgres)
            .recover(3)
            .await
            .unwrap();

        assert_eq!(reverted, vec![3]);
        assert_eq!(backend.current(), 2);
    }

    #[tokio::test]
    async fn test_recover_passes_over_already_reverted_versions() {
        let backend = MemoryBackend::with_applied(&[applied(3), applied(4)]);
        backend.record(4, false, None);

        let reverted = RollbackRecovery::new(&backend, Dialect::Postgres)
            .recover(3)
            .await
            .unwrap();

        assert_eq!(reverted, vec![3]);
    }

    #[tokio::test]
    async fn test_parse_failure_keeps_earlier_reverts() {
        let backend = MemoryBackend::with_applied(&[
            applied(3),
            applied_with(4, "-- Down migration\nDROP TABLE t4"),
            applied(5),
        ]);

        let err = RollbackRecovery::new(&backend, Dialect::Postgres)
            .recover(3)
            .await
            .unwrap_err();

        assert!(matches!(err, MigrateError::RecoveryParse { version: 4, .. }));
        assert_eq!(backend.executions(), vec![(5, Direction::Down)]);
        assert_eq!(backend.current(), 4);
    }

    #[tokio::test]
    async fn test_bare_sql_payload_is_reverted() {
        let backend = MemoryBackend::with_applied(&[applied_with(2, "DROP TABLE t2;")]);

        let reverted = RollbackRecovery::new(&backend, Dialect::Postgres)
            .recover(1)
            .await
            .unwrap();

        assert_eq!(reverted, vec![2]);
        assert_eq!(backend.statements(), vec!["DROP TABLE t2;"]);
        assert_eq!(backend.current(), 0);
    }

    #[tokio::test]
    async fn test_missing_payload_is_a_recovery_error() {
        let backend = MemoryBackend::with_applied(&[(3, None)]);

        let err = RollbackRecovery::new(&backend, Dialect::Postgres)
            .recover(3)
            .await
            .unwrap_err();

        assert_eq!(err.version(), Some(3));
        assert!(err.to_string().contains("no rollback script recorded"));
        assert!(backend.executions().is_empty());
    }

    #[tokio::test]
    async fn test_execution_failure_stops_recovery() {
        let backend = MemoryBackend::with_applied(&[applied(3), applied(4)]);
        backend.fail_on(4, Direction::Down);

        let err = RollbackRecovery::new(&backend, Dialect::Postgres)
            .recover(3)
            .await
            .unwrap_err();

        assert!(matches!(err, MigrateError::Execution { version: 4, .. }));
        assert!(backend.executions().is_empty());
        assert_eq!(backend.current(), 4);
    }

    #[tokio::test]
    async fn test_sink_receives_script_before_revert() {
        let backend = MemoryBackend::with_applied(&[applied(3), applied(4)]);
        backend.fail_on(3, Direction::Down);
        let sink = RecordingSink::default();

        let result = RollbackRecovery::new(&backend, Dialect::Postgres)
            .with_sink(&sink)
            .recover(3)
            .await;

        assert!(result.is_err());
        // Version 3 was dumped even though its revert failed.
        assert_eq!(*sink.persisted.lock().unwrap(), vec![4, 3]);
    }

    #[tokio::test]
    async fn test_directory_sink_writes_named_files() {
        let dir = TempDir::new().unwrap();
        let sink = DirectorySink::new(dir.path().join("recovered"));
        let backend = MemoryBackend::with_applied(&[applied(7)]);

        RollbackRecovery::new(&backend, Dialect::Postgres)
            .with_sink(&sink)
            .recover(7)
            .await
            .unwrap();

        let path = sink.path_for(7);
        assert!(path.ends_with("7_down_version.sql"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), down_data(7));
    }
}
