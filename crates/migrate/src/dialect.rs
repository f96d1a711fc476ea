//! SQL dialects for the version history table
//!
//! The dialect is an explicit value handed to the backend when it is built.
//! It decides the DDL and DML used for the version table and the grammar the
//! script parser checks statements against.

use sqlparser::dialect::{
    Dialect as SqlParserDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect,
};

use crate::error::{MigrateError, MigrateResult};

/// Database dialect enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
}

impl Dialect {
    /// Infer the dialect from a connection URL scheme
    pub fn from_url(url: &str) -> Option<Self> {
        let scheme = url.split_once("://").map(|(scheme, _)| scheme)?;
        scheme.parse().ok()
    }

    /// Grammar used to check statements while parsing scripts
    pub fn parser_dialect(&self) -> Box<dyn SqlParserDialect> {
        match self {
            Dialect::Postgres => Box::new(PostgreSqlDialect {}),
            Dialect::MySql => Box::new(MySqlDialect {}),
            Dialect::Sqlite => Box::new(SQLiteDialect {}),
        }
    }

    fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", index),
            Dialect::MySql | Dialect::Sqlite => "?".to_string(),
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::Postgres => write!(f, "postgres"),
            Dialect::MySql => write!(f, "mysql"),
            Dialect::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            _ => Err(format!("Unsupported database dialect: {}", s)),
        }
    }
}

/// The version history table as seen through one dialect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionTable {
    dialect: Dialect,
    name: String,
}

impl VersionTable {
    /// The table name may be schema-qualified; anything but `[A-Za-z0-9_.]` is rejected.
    pub fn new(dialect: Dialect, name: impl Into<String>) -> MigrateResult<Self> {
        let name = name.into();
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && !name.ends_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
        if !valid {
            return Err(MigrateError::configuration(format!(
                "invalid version table name '{}'",
                name
            )));
        }
        Ok(Self { dialect, name })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// SQL to create the version table
    pub fn create_sql(&self) -> String {
        let columns = match self.dialect {
            Dialect::Postgres => {
                "id BIGSERIAL PRIMARY KEY,\n    \
                 version_id BIGINT NOT NULL,\n    \
                 is_applied BOOLEAN NOT NULL,\n    \
                 tstamp TIMESTAMPTZ NOT NULL DEFAULT now(),\n    \
                 down_data TEXT"
            }
            Dialect::MySql => {
                "id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,\n    \
                 version_id BIGINT NOT NULL,\n    \
                 is_applied BOOLEAN NOT NULL,\n    \
                 tstamp TIMESTAMP NULL DEFAULT CURRENT_TIMESTAMP,\n    \
                 down_data LONGTEXT"
            }
            Dialect::Sqlite => {
                "id INTEGER PRIMARY KEY AUTOINCREMENT,\n    \
                 version_id INTEGER NOT NULL,\n    \
                 is_applied INTEGER NOT NULL,\n    \
                 tstamp TIMESTAMP DEFAULT (datetime('now')),\n    \
                 down_data TEXT"
            }
        };
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            self.name, columns
        )
    }

    /// SQL counting the rows of the version table
    pub fn count_sql(&self) -> String {
        format!("SELECT COUNT(*) FROM {}", self.name)
    }

    /// SQL appending one history row: (version_id, is_applied, down_data)
    pub fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (version_id, is_applied, down_data) VALUES ({}, {}, {})",
            self.name,
            self.dialect.placeholder(1),
            self.dialect.placeholder(2),
            self.dialect.placeholder(3)
        )
    }

    /// SQL reading the whole history, newest row first
    pub fn history_sql(&self) -> String {
        format!(
            "SELECT id, version_id, is_applied, tstamp, down_data FROM {} ORDER BY id DESC",
            self.name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_from_url() {
        assert_eq!(
            Dialect::from_url("postgres://localhost/app"),
            Some(Dialect::Postgres)
        );
        assert_eq!(
            Dialect::from_url("postgresql://u:p@db:5432/app"),
            Some(Dialect::Postgres)
        );
        assert_eq!(Dialect::from_url("mysql://localhost/app"), Some(Dialect::MySql));
        assert_eq!(Dialect::from_url("sqlite://app.db"), Some(Dialect::Sqlite));
        assert_eq!(Dialect::from_url("redis://localhost"), None);
        assert_eq!(Dialect::from_url("not a url"), None);
    }

    #[test]
    fn test_postgres_version_table_sql() {
        let table = VersionTable::new(Dialect::Postgres, "tidemark_db_version").unwrap();

        let create = table.create_sql();
        assert!(create.starts_with("CREATE TABLE IF NOT EXISTS tidemark_db_version ("));
        assert!(create.contains("id BIGSERIAL PRIMARY KEY"));
        assert!(create.contains("down_data TEXT"));

        assert_eq!(
            table.insert_sql(),
            "INSERT INTO tidemark_db_version (version_id, is_applied, down_data) VALUES ($1, $2, $3)"
        );
        assert!(table.history_sql().ends_with("FROM tidemark_db_version ORDER BY id DESC"));
    }

    #[test]
    fn test_mysql_and_sqlite_placeholders() {
        let mysql = VersionTable::new(Dialect::MySql, "versions").unwrap();
        assert!(mysql.insert_sql().ends_with("VALUES (?, ?, ?)"));
        assert!(mysql.create_sql().contains("AUTO_INCREMENT"));

        let sqlite = VersionTable::new(Dialect::Sqlite, "versions").unwrap();
        assert!(sqlite.insert_sql().ends_with("VALUES (?, ?, ?)"));
        assert!(sqlite.create_sql().contains("AUTOINCREMENT"));
    }

    #[test]
    fn test_table_name_validation() {
        assert!(VersionTable::new(Dialect::Postgres, "ops.schema_versions").is_ok());
        assert!(VersionTable::new(Dialect::Postgres, "").is_err());
        assert!(VersionTable::new(Dialect::Postgres, "versions; DROP TABLE users").is_err());
        assert!(VersionTable::new(Dialect::Postgres, "versions.").is_err());
    }
}
