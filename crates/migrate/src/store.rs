//! Version store abstraction
//!
//! Reads the version history table. Writes happen through
//! [`crate::runner::MigrationExecutor`], in the same scope as the migration
//! statements they record.

use async_trait::async_trait;

use crate::definitions::{History, Version};
use crate::error::MigrateResult;

/// Read access to the version history table
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Create the version table if missing, seeding the baseline row for version 0
    async fn ensure_version_table(&self) -> MigrateResult<()>;

    /// Every recorded row, newest first
    async fn history(&self) -> MigrateResult<History>;

    /// Highest version whose latest row is applied, or 0
    async fn current_version(&self) -> MigrateResult<Version> {
        Ok(self.history().await?.current_version())
    }
}
