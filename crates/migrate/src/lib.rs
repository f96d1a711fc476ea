//! # tidemark-migrate: Version-reconciling SQL migrations
//!
//! Compares the version recorded in the database with the migrations found on
//! disk and moves the database to the highest version on disk. Moving down
//! works even after migration files were deleted: every applied version keeps
//! its rollback script in the version table, and recovery replays those.
//!
//! The pieces, bottom-up:
//!
//! - [`parser`] splits `-- Up migration` / `-- Down migration` scripts into statements
//! - [`catalog`] loads `<version>_<name>.sql` files from a directory
//! - [`store`] and [`runner`] are the backend seams; [`backends::postgres`] implements them
//! - [`recovery`] reverts versions from their recorded rollback scripts
//! - [`engine`] decides the direction and drives the runners
//! - [`migrator`] ties a backend, a catalog and a configuration together

pub mod backends;
pub mod catalog;
pub mod definitions;
pub mod dialect;
pub mod engine;
pub mod error;
pub mod migrator;
pub mod parser;
pub mod recovery;
pub mod runner;
pub mod store;

#[cfg(test)]
mod testing;


// Re-export core traits and types
pub use backends::PostgresBackend;
pub use catalog::MigrationCatalog;
pub use definitions::*;
pub use dialect::{Dialect, VersionTable};
pub use engine::ReconciliationEngine;
pub use error::{MigrateError, MigrateResult, Operation};
pub use migrator::Migrator;
pub use parser::{parse_rollback_script, parse_script, ParsedScript};
pub use recovery::{DirectorySink, RecoverySink, RollbackRecovery};
pub use runner::{ExecutableMigration, MigrationBackend, MigrationExecutor, MigrationRunner};
pub use store::VersionStore;
