//! Migration Definitions - Core types and structures for migrations
//!
//! Defines the fundamental types used throughout the migration system: the
//! catalog-side [`Migration`], the database-side [`MigrationRecord`] and its
//! [`History`], the [`ReconciliationPlan`] and the results of a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::parser::{BLOCK_BEGIN, BLOCK_END, DOWN_MARKER, NO_TRANSACTION};

/// Schema version identifier. Version 0 is the unmigrated baseline.
pub type Version = i64;

/// Represents a migration definition loaded from the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    /// Version number taken from the file name
    pub version: Version,
    /// Human-readable name for the migration
    pub name: String,
    /// File the definition was loaded from
    pub source: Option<PathBuf>,
    /// Statements that apply the migration
    pub up: Vec<String>,
    /// Statements that revert the migration
    pub down: Vec<String>,
    /// Whether each direction runs inside its own transaction
    pub use_transaction: bool,
}

impl Migration {
    pub fn new(version: Version, name: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
            source: None,
            up: Vec::new(),
            down: Vec::new(),
            use_transaction: true,
        }
    }

    /// Render the standalone rollback script stored as `down_data`.
    ///
    /// The output parses back with [`crate::parser::parse_script`] into the same
    /// down statements and transaction flag.
    pub fn down_script(&self) -> String {
        let mut script = String::new();
        script.push_str(DOWN_MARKER);
        script.push('\n');
        if !self.use_transaction {
            script.push_str(NO_TRANSACTION);
            script.push('\n');
        }
        for statement in &self.down {
            if needs_block(statement) {
                script.push_str(BLOCK_BEGIN);
                script.push('\n');
                script.push_str(statement);
                script.push('\n');
                script.push_str(BLOCK_END);
            } else {
                script.push_str(statement);
            }
            script.push('\n');
        }
        script
    }
}

/// A statement survives plain line splitting only if its sole `;` line is the last one.
fn needs_block(statement: &str) -> bool {
    let lines: Vec<&str> = statement.lines().collect();
    let Some((last, body)) = lines.split_last() else {
        return false;
    };
    !last.trim_end().ends_with(';')
        || body.iter().any(|line| {
            let line = line.trim();
            line.ends_with(';') || line.starts_with("--")
        })
}

/// One row of the version history table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Insertion sequence; later rows have larger ids
    pub id: i64,
    pub version_id: Version,
    pub is_applied: bool,
    pub tstamp: Option<DateTime<Utc>>,
    /// Rollback script captured when the version was applied
    pub down_data: Option<String>,
}

/// Immutable snapshot of the version history table, newest row first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
    records: Vec<MigrationRecord>,
}

impl History {
    pub fn new(mut records: Vec<MigrationRecord>) -> Self {
        records.sort_by(|a, b| b.id.cmp(&a.id));
        Self { records }
    }

    /// All rows, newest first
    pub fn records(&self) -> &[MigrationRecord] {
        &self.records
    }

    /// The most recent row for every version, highest version first
    pub fn latest_desc(&self) -> Vec<&MigrationRecord> {
        let mut latest: BTreeMap<Version, &MigrationRecord> = BTreeMap::new();
        for record in &self.records {
            latest.entry(record.version_id).or_insert(record);
        }
        latest.into_values().rev().collect()
    }

    /// The most recent row for a version
    pub fn latest(&self, version: Version) -> Option<&MigrationRecord> {
        self.records.iter().find(|r| r.version_id == version)
    }

    /// Highest version whose latest row is applied, or 0
    pub fn current_version(&self) -> Version {
        self.latest_desc()
            .into_iter()
            .find(|r| r.is_applied)
            .map(|r| r.version_id)
            .unwrap_or(0)
    }

    pub fn is_applied(&self, version: Version) -> bool {
        self.latest(version).map_or(false, |r| r.is_applied)
    }
}

/// Direction of motion between the recorded and the target version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Apply the migration (run UP statements)
    Up,
    /// Rollback the migration (run DOWN statements)
    Down,
    /// Already converged
    None,
}

/// What a reconciliation run is about to do. Recomputed from live state on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationPlan {
    pub current: Version,
    pub target: Version,
    pub direction: Direction,
}

impl ReconciliationPlan {
    pub fn new(current: Version, target: Version) -> Self {
        let direction = match current.cmp(&target) {
            Ordering::Less => Direction::Up,
            Ordering::Greater => Direction::Down,
            Ordering::Equal => Direction::None,
        };
        Self {
            current,
            target,
            direction,
        }
    }

    pub fn is_converged(&self) -> bool {
        self.direction == Direction::None
    }
}

/// Result of running migrations forward
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRunResult {
    pub from: Version,
    pub to: Version,
    /// Versions that were applied, in order
    pub applied_migrations: Vec<Version>,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

/// Result of rolling back migrations
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackResult {
    pub from: Version,
    pub to: Version,
    /// Versions reverted from scripts recorded in the version table, in order
    pub recovered_migrations: Vec<Version>,
    /// Versions reverted from catalog definitions, in order
    pub rolled_back_migrations: Vec<Version>,
    /// Versions at or below the target applied afterwards, because history had no record of them
    pub reapplied_migrations: Vec<Version>,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

impl RollbackResult {
    pub fn rolled_back_count(&self) -> usize {
        self.recovered_migrations.len() + self.rolled_back_migrations.len()
    }
}

/// Outcome of a reconciliation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Current version already equals the catalog's top version
    Converged { version: Version },
    MigratedUp(MigrationRunResult),
    MigratedDown(RollbackResult),
}

impl Outcome {
    pub fn is_converged(&self) -> bool {
        matches!(self, Outcome::Converged { .. })
    }

    /// Version the database is at after the run
    pub fn final_version(&self) -> Version {
        match self {
            Outcome::Converged { version } => *version,
            Outcome::MigratedUp(result) => result.to,
            Outcome::MigratedDown(result) => result.to,
        }
    }
}

/// Migration status in the system
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum MigrationStatus {
    /// Migration is pending (not yet applied)
    Pending,
    /// Migration has been applied
    Applied {
        /// When it was applied
        applied_at: Option<DateTime<Utc>>,
    },
}

/// One catalog entry joined with its recorded state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub version: Version,
    pub name: String,
    pub status: MigrationStatus,
}

/// Configuration for the migration system
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Directory where migration files are stored
    pub migrations_dir: PathBuf,
    /// Table name for tracking versions
    pub migrations_table: String,
    /// Lowest version the catalog collects
    pub min_version: Version,
    /// Highest version the catalog collects
    pub max_version: Version,
    /// Where recovered rollback scripts are written, if anywhere
    pub dump_dir: Option<PathBuf>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from("migrations"),
            migrations_table: "tidemark_db_version".to_string(),
            min_version: 0,
            max_version: Version::MAX,
            dump_dir: None,
        }
    }
}
