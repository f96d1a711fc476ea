use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use tidemark_migrate::{Dialect, MigrationConfig};

pub const DEFAULT_TABLE: &str = "tidemark_db_version";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Plain,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "plain" | "compact" | "text" => Ok(LogFormat::Plain),
            "json" => Ok(LogFormat::Json),
            _ => Err(ConfigError::InvalidValue {
                field: "LOG_FORMAT".to_string(),
                value: s.to_string(),
                expected: "plain or json".to_string(),
            }),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl LoggingConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let level = get_env_or_default("LOG_LEVEL", "info");
        let format = get_env_or_default("LOG_FORMAT", "plain").parse()?;
        Ok(Self { level, format })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "LOG_LEVEL".to_string(),
                value: self.level.clone(),
                expected: "trace, debug, info, warn, or error".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Plain,
        }
    }
}

/// Command-line values that take precedence over the environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub database_url: Option<String>,
    pub migrations_dir: Option<PathBuf>,
    pub table: Option<String>,
    pub dump_dir: Option<PathBuf>,
}

/// Application configuration structure
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub migrations_dir: PathBuf,
    pub table: String,
    pub dump_dir: Option<PathBuf>,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: get_env_optional("DATABASE_URL"),
            migrations_dir: PathBuf::from(get_env_or_default("TIDEMARK_DIR", "migrations")),
            table: get_env_or_default("TIDEMARK_TABLE", DEFAULT_TABLE),
            dump_dir: get_env_optional("TIDEMARK_DUMP_DIR").map(PathBuf::from),
            logging: LoggingConfig::from_env()?,
        })
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if let Some(url) = overrides.database_url {
            self.database_url = Some(url);
        }
        if let Some(dir) = overrides.migrations_dir {
            self.migrations_dir = dir;
        }
        if let Some(table) = overrides.table {
            self.table = table;
        }
        if overrides.dump_dir.is_some() {
            self.dump_dir = overrides.dump_dir;
        }
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.table.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "TIDEMARK_TABLE".to_string(),
                value: self.table.clone(),
                expected: "a table name".to_string(),
            });
        }
        if let Some(url) = &self.database_url {
            self.dialect_for(url)?;
        }
        self.logging.validate()
    }

    /// The database URL, required by every command that talks to the database
    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or_else(|| ConfigError::MissingRequired {
                field: "DATABASE_URL".to_string(),
                hint: "set DATABASE_URL or pass --database-url".to_string(),
            })
    }

    /// Dialect of the configured database. Only PostgreSQL has a live backend.
    pub fn dialect(&self) -> Result<Dialect, ConfigError> {
        let url = self.database_url()?;
        self.dialect_for(url)
    }

    fn dialect_for(&self, url: &str) -> Result<Dialect, ConfigError> {
        let scheme = url.split_once("://").map_or(url, |(scheme, _)| scheme);
        match Dialect::from_url(url) {
            Some(Dialect::Postgres) => Ok(Dialect::Postgres),
            _ => Err(ConfigError::InvalidValue {
                field: "DATABASE_URL".to_string(),
                value: scheme.to_string(),
                expected: "a postgres:// or postgresql:// URL".to_string(),
            }),
        }
    }

    pub fn migration_config(&self) -> MigrationConfig {
        MigrationConfig {
            migrations_dir: self.migrations_dir.clone(),
            migrations_table: self.table.clone(),
            dump_dir: self.dump_dir.clone(),
            ..Default::default()
        }
    }
}

fn get_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

fn get_env_or_default(key: &str, default: &str) -> String {
    get_env_optional(key).unwrap_or_else(|| default.to_string())
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {field}. {hint}")]
    MissingRequired { field: String, hint: String },

    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },
}
