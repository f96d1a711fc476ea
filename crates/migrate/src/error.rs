//! Error types for the migration system
//!
//! Every failure surfaced by the reconciliation engine is a [`MigrateError`].
//! Sub-operations wrap their failures in [`MigrateError::Context`] so the caller
//! can tell which step failed and for which version range without re-running.

use std::fmt;
use thiserror::Error;

use crate::definitions::Version;

/// Result type alias for migration operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// The sub-operation a failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Reading the current version from the version table
    CurrentVersionLookup,
    /// Enumerating and parsing migration definitions
    CatalogCollection,
    /// Applying pending migrations
    ForwardRun,
    /// Reverting versions from their recorded rollback scripts
    Recovery,
    /// Reverting versions from catalog definitions
    RevertRun,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CurrentVersionLookup => "current-version lookup",
            Operation::CatalogCollection => "catalog collection",
            Operation::ForwardRun => "forward run",
            Operation::Recovery => "recovery",
            Operation::RevertRun => "revert run",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error types for migration operations
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("Version lookup failed: {message}")]
    Lookup { message: String },

    #[error("Migration catalog error: {message}")]
    Catalog { message: String },

    #[error("Invalid migration script: {message}")]
    Parse { message: String },

    #[error("Migration {version} failed: {message}")]
    Execution { version: Version, message: String },

    #[error("Recorded rollback script for version {version} is unusable: {message}")]
    RecoveryParse { version: Version, message: String },

    #[error("No migration definition found for applied version {version}")]
    MissingDefinition { version: Version },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{operation} ({bounds}): {source}")]
    Context {
        operation: Operation,
        bounds: String,
        source: Box<MigrateError>,
    },
}

impl MigrateError {
    /// Create a version lookup error
    pub fn lookup(message: impl Into<String>) -> Self {
        Self::Lookup {
            message: message.into(),
        }
    }

    /// Create a catalog error
    pub fn catalog(message: impl Into<String>) -> Self {
        Self::Catalog {
            message: message.into(),
        }
    }

    /// Create a script parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Create an execution error for a specific version
    pub fn execution(version: Version, message: impl Into<String>) -> Self {
        Self::Execution {
            version,
            message: message.into(),
        }
    }

    /// Create a recovery parse error for a specific version
    pub fn recovery_parse(version: Version, message: impl Into<String>) -> Self {
        Self::RecoveryParse {
            version,
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Wrap this error with the operation it failed in and the versions involved
    pub fn context(self, operation: Operation, bounds: impl Into<String>) -> Self {
        Self::Context {
            operation,
            bounds: bounds.into(),
            source: Box::new(self),
        }
    }

    /// The outermost operation this error was reported from, if any
    pub fn operation(&self) -> Option<Operation> {
        match self {
            Self::Context { operation, .. } => Some(*operation),
            _ => None,
        }
    }

    /// The innermost error with all context layers removed
    pub fn root(&self) -> &MigrateError {
        let mut current = self;
        while let Self::Context { source, .. } = current {
            current = source;
        }
        current
    }

    /// The version the root error refers to, if it carries one
    pub fn version(&self) -> Option<Version> {
        match self.root() {
            Self::Execution { version, .. }
            | Self::RecoveryParse { version, .. }
            | Self::MissingDefinition { version } => Some(*version),
            _ => None,
        }
    }
}
