//! Migration Runner - Executes migrations against the database
//!
//! The Up-runner applies pending definitions in ascending order, the Down-runner
//! reverts applied versions one at a time. Both stop at the first failure and
//! leave whatever already committed in place.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::definitions::{Direction, Migration, Version};
use crate::error::{MigrateError, MigrateResult};
use crate::parser::ParsedScript;
use crate::store::VersionStore;

/// One migration step ready to run in a single direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableMigration {
    pub version: Version,
    pub direction: Direction,
    pub statements: Vec<String>,
    pub use_transaction: bool,
    /// Rollback script to record alongside an applied version
    pub down_data: Option<String>,
}

impl ExecutableMigration {
    /// Apply a catalog definition, capturing its rollback script
    pub fn apply(migration: &Migration) -> Self {
        Self {
            version: migration.version,
            direction: Direction::Up,
            statements: migration.up.clone(),
            use_transaction: migration.use_transaction,
            down_data: Some(migration.down_script()),
        }
    }

    /// Revert a catalog definition
    pub fn revert(migration: &Migration) -> Self {
        Self {
            version: migration.version,
            direction: Direction::Down,
            statements: migration.down.clone(),
            use_transaction: migration.use_transaction,
            down_data: None,
        }
    }

    /// Revert a version from a rollback script recovered from the version table
    pub fn recovered(version: Version, script: ParsedScript) -> Self {
        Self {
            version,
            direction: Direction::Down,
            statements: script.down,
            use_transaction: script.use_transaction,
            down_data: None,
        }
    }

    /// Value of `is_applied` for the row this step records
    pub fn records_applied(&self) -> bool {
        self.direction == Direction::Up
    }
}

/// Runs one migration step and records it
#[async_trait]
pub trait MigrationExecutor: Send + Sync {
    /// Execute every statement and append the history row in one scope.
    ///
    /// With `use_transaction` the statements and the row commit together or not
    /// at all. Failures are reported as [`MigrateError::Execution`].
    async fn execute(&self, migration: &ExecutableMigration) -> MigrateResult<()>;
}

/// A backend that can both read history and run migrations
pub trait MigrationBackend: VersionStore + MigrationExecutor {}

impl<T: VersionStore + MigrationExecutor + ?Sized> MigrationBackend for T {}

/// Up and Down runners over a backend
pub struct MigrationRunner<'a, B: ?Sized> {
    backend: &'a B,
}

impl<'a, B: MigrationBackend + ?Sized> MigrationRunner<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    /// Apply every migration with `current < version <= target`, ascending
    pub async fn up_to(
        &self,
        current: Version,
        catalog: &[Migration],
        target: Version,
    ) -> MigrateResult<Vec<Version>> {
        let mut pending: Vec<&Migration> = catalog
            .iter()
            .filter(|m| m.version > current && m.version <= target)
            .collect();
        pending.sort_by_key(|m| m.version);

        let mut applied = Vec::with_capacity(pending.len());
        for migration in pending {
            self.apply(migration).await?;
            applied.push(migration.version);
        }
        Ok(applied)
    }

    /// Revert applied versions one by one until the current version is `<= target`
    pub async fn down_to(
        &self,
        target: Version,
        catalog: &[Migration],
    ) -> MigrateResult<Vec<Version>> {
        let mut reverted: Vec<Version> = Vec::new();
        loop {
            let current = self.backend.current_version().await?;
            if current <= target {
                return Ok(reverted);
            }
            // A version must not come back after its revert was recorded.
            if reverted.contains(&current) {
                return Err(MigrateError::execution(
                    current,
                    "version is still applied after its revert was recorded",
                ));
            }

            let migration = catalog
                .iter()
                .find(|m| m.version == current)
                .ok_or(MigrateError::MissingDefinition { version: current })?;
            self.revert(migration).await?;
            reverted.push(current);
        }
    }

    /// Revert only the current version, if any
    pub async fn down_one(&self, catalog: &[Migration]) -> MigrateResult<Option<Version>> {
        let current = self.backend.current_version().await?;
        if current == 0 {
            return Ok(None);
        }
        let history = self.backend.history().await?;
        let previous = history
            .latest_desc()
            .into_iter()
            .find(|r| r.is_applied && r.version_id < current)
            .map(|r| r.version_id)
            .unwrap_or(0);
        let reverted = self.down_to(previous, catalog).await?;
        Ok(reverted.first().copied())
    }

    /// Apply a single migration
    pub async fn apply(&self, migration: &Migration) -> MigrateResult<()> {
        debug!(
            "Applying migration {} ({} statements, transaction: {})",
            migration.version,
            migration.up.len(),
            migration.use_transaction
        );
        self.backend
            .execute(&ExecutableMigration::apply(migration))
            .await?;
        info!("OK   {} {}", migration.version, migration.name);
        Ok(())
    }

    /// Revert a single migration
    pub async fn revert(&self, migration: &Migration) -> MigrateResult<()> {
        self.backend
            .execute(&ExecutableMigration::revert(migration))
            .await?;
        info!("OK   {} {} (reverted)", migration.version, migration.name);
        Ok(())
    }
}
