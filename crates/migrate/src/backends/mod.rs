//! Database backends
//!
//! Each backend implements [`crate::store::VersionStore`] and
//! [`crate::runner::MigrationExecutor`] for one database driver. Only
//! PostgreSQL is wired to a live driver; the other [`crate::dialect::Dialect`]s
//! are available for SQL generation and script checking.

pub mod postgres;

pub use postgres::PostgresBackend;
