//! Migration Catalog - File system operations for migrations
//!
//! Handles creating, loading, and parsing migration files. Files are named
//! `<version>_<name>.sql`; the catalog only ever hands out parsed definitions
//! sorted by version.

use chrono::Utc;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::definitions::{Migration, Version};
use crate::dialect::Dialect;
use crate::error::{MigrateError, MigrateResult};
use crate::parser::{parse_script, DOWN_MARKER, UP_MARKER};

/// Migration catalog backed by a directory of SQL files
#[derive(Debug, Clone)]
pub struct MigrationCatalog {
    dir: PathBuf,
    dialect: Dialect,
}

impl MigrationCatalog {
    pub fn new(dir: impl Into<PathBuf>, dialect: Dialect) -> Self {
        Self {
            dir: dir.into(),
            dialect,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Migrations with `min <= version <= max`, ascending. Empty when nothing matches.
    pub fn collect(&self, min: Version, max: Version) -> MigrateResult<Vec<Migration>> {
        let migrations = self
            .load()?
            .into_iter()
            .filter(|m| m.version >= min && m.version <= max)
            .collect();
        Ok(migrations)
    }

    /// Load all migration files from the migrations directory
    pub fn load(&self) -> MigrateResult<Vec<Migration>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.dir).map_err(|e| {
            MigrateError::catalog(format!(
                "failed to read migrations directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let mut migrations = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                MigrateError::catalog(format!("failed to read directory entry: {}", e))
            })?;

            let path = entry.path();
            if path.is_file() && path.extension().map_or(false, |ext| ext == "sql") {
                migrations.push(self.parse_file(&path)?);
            }
        }

        migrations.sort_by_key(|m| m.version);

        let mut seen = HashSet::new();
        for migration in &migrations {
            if !seen.insert(migration.version) {
                return Err(MigrateError::catalog(format!(
                    "duplicate migration version {} in {}",
                    migration.version,
                    self.dir.display()
                )));
            }
        }

        Ok(migrations)
    }

    /// Parse a migration file into a Migration
    fn parse_file(&self, path: &Path) -> MigrateResult<Migration> {
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| MigrateError::catalog(format!("invalid file name: {}", path.display())))?;

        let (version, name) = parse_file_name(file_name).ok_or_else(|| {
            MigrateError::catalog(format!(
                "migration file '{}' must be named <version>_<name>.sql",
                file_name
            ))
        })?;

        let content = fs::read_to_string(path).map_err(|e| {
            MigrateError::catalog(format!("failed to read {}: {}", path.display(), e))
        })?;

        let script = parse_script(&content, self.dialect)
            .map_err(|e| MigrateError::catalog(format!("{}: {}", file_name, e)))?;

        Ok(Migration {
            version,
            name,
            source: Some(path.to_path_buf()),
            up: script.up,
            down: script.down,
            use_transaction: script.use_transaction,
        })
    }

    /// Create a new migration file, returning its path
    pub fn create(&self, name: &str) -> MigrateResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let version = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let slug = name.trim().replace(' ', "_").to_lowercase();
        if slug.is_empty() {
            return Err(MigrateError::catalog("migration name must not be empty"));
        }

        let path = self.dir.join(format!("{}_{}.sql", version, slug));
        if path.exists() {
            return Err(MigrateError::catalog(format!(
                "migration file {} already exists",
                path.display()
            )));
        }

        fs::write(&path, migration_template(name))?;
        Ok(path)
    }
}

/// Split `<version>_<name>.sql` into its version and a readable name
pub fn parse_file_name(file_name: &str) -> Option<(Version, String)> {
    let stem = file_name.strip_suffix(".sql")?;
    let digits = stem.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let version: Version = stem[..digits].parse().ok()?;
    let rest = &stem[digits..];
    if !rest.is_empty() && !rest.starts_with('_') {
        return None;
    }
    let name = rest.trim_start_matches('_').replace('_', " ");
    Some((version, name))
}

fn migration_template(name: &str) -> String {
    format!(
        "-- Migration: {}\n\
         -- Created: {}\n\n\
         {}\n\
         -- Add your schema changes here\n\n\n\
         {}\n\
         -- Add rollback statements here\n\n",
        name,
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        UP_MARKER,
        DOWN_MARKER
    )
}
