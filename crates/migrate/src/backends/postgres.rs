//! PostgreSQL Backend Implementation
//!
//! Runs migrations and reads the version table through a sqlx connection pool.

use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use tracing::debug;

use crate::definitions::{History, MigrationRecord, Version};
use crate::dialect::{Dialect, VersionTable};
use crate::error::{MigrateError, MigrateResult};
use crate::runner::{ExecutableMigration, MigrationExecutor};
use crate::store::VersionStore;

/// PostgreSQL database backend implementation
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: PgPool,
    table: VersionTable,
}

impl PostgresBackend {
    pub fn new(pool: PgPool, table: VersionTable) -> MigrateResult<Self> {
        if table.dialect() != Dialect::Postgres {
            return Err(MigrateError::configuration(format!(
                "version table {} is declared for {}, not postgres",
                table.name(),
                table.dialect()
            )));
        }
        Ok(Self { pool, table })
    }

    /// Open a small pool against `database_url`
    pub async fn connect(database_url: &str, table: VersionTable) -> MigrateResult<Self> {
        if !database_url.starts_with("postgresql://") && !database_url.starts_with("postgres://") {
            return Err(MigrateError::configuration("Invalid PostgreSQL URL scheme"));
        }

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await?;

        Self::new(pool, table)
    }

    pub fn table(&self) -> &VersionTable {
        &self.table
    }

    async fn run_statements(
        &self,
        conn: &mut PgConnection,
        migration: &ExecutableMigration,
    ) -> MigrateResult<()> {
        for statement in &migration.statements {
            debug!("{}", statement);
            sqlx::query(statement)
                .execute(&mut *conn)
                .await
                .map_err(|e| MigrateError::execution(migration.version, e.to_string()))?;
        }

        sqlx::query(&self.table.insert_sql())
            .bind(migration.version)
            .bind(migration.records_applied())
            .bind(migration.down_data.as_deref())
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                MigrateError::execution(
                    migration.version,
                    format!("failed to record version: {}", e),
                )
            })?;
        Ok(())
    }
}

fn record_from_row(row: &PgRow) -> Result<MigrationRecord, sqlx::Error> {
    Ok(MigrationRecord {
        id: row.try_get("id")?,
        version_id: row.try_get::<Version, _>("version_id")?,
        is_applied: row.try_get("is_applied")?,
        tstamp: row.try_get("tstamp")?,
        down_data: row.try_get("down_data")?,
    })
}

#[async_trait]
impl VersionStore for PostgresBackend {
    async fn ensure_version_table(&self) -> MigrateResult<()> {
        sqlx::query(&self.table.create_sql())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                MigrateError::lookup(format!("failed to create {}: {}", self.table.name(), e))
            })?;

        let rows: i64 = sqlx::query_scalar(&self.table.count_sql())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MigrateError::lookup(format!("failed to count {}: {}", self.table.name(), e)))?;

        if rows == 0 {
            debug!("Seeding baseline row in {}", self.table.name());
            sqlx::query(&self.table.insert_sql())
                .bind(0_i64)
                .bind(true)
                .bind(Option::<String>::None)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    MigrateError::lookup(format!(
                        "failed to seed {}: {}",
                        self.table.name(),
                        e
                    ))
                })?;
        }
        Ok(())
    }

    async fn history(&self) -> MigrateResult<History> {
        let rows = sqlx::query(&self.table.history_sql())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MigrateError::lookup(format!("failed to read {}: {}", self.table.name(), e)))?;

        let records = rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| MigrateError::lookup(format!("malformed row in {}: {}", self.table.name(), e)))?;

        Ok(History::new(records))
    }
}

#[async_trait]
impl MigrationExecutor for PostgresBackend {
    async fn execute(&self, migration: &ExecutableMigration) -> MigrateResult<()> {
        if migration.use_transaction {
            let mut tx = self.pool.begin().await.map_err(|e| {
                MigrateError::execution(
                    migration.version,
                    format!("failed to start transaction: {}", e),
                )
            })?;

            // Dropping `tx` on error rolls back.
            self.run_statements(&mut tx, migration).await?;

            tx.commit().await.map_err(|e| {
                MigrateError::execution(migration.version, format!("failed to commit: {}", e))
            })?;
        } else {
            let mut conn = self.pool.acquire().await.map_err(|e| {
                MigrateError::execution(
                    migration.version,
                    format!("failed to acquire connection: {}", e),
                )
            })?;
            self.run_statements(&mut conn, migration).await?;
        }
        Ok(())
    }
}
