//! Error types for repository operations.
//!
//! Every failure is surfaced to the caller as a typed [`RepoError`]; nothing
//! in this crate retries.

use std::path::PathBuf;

use schemarepo_core::SchemaError;
use thiserror::Error;

use crate::manager::ManagerState;

/// Errors that can occur while building or using repositories.
#[derive(Debug, Error)]
pub enum RepoError {
    /// Malformed or inconsistent schema.
    #[error("schema error: {0}")]
    SchemaError(#[from] SchemaError),

    /// Engine failure during save, load, delete or query. The engine error is
    /// kept as the source.
    #[error("persistence error: {0}")]
    PersistenceError(#[from] rusqlite::Error),

    /// A filter or record field names a column the table does not have.
    #[error("unknown column '{column}' for table {table}")]
    FilterError { table: String, column: String },

    /// `load_single` matched more than one row.
    #[error("expected at most one row from {table}, found {count}")]
    AmbiguousResultError { table: String, count: usize },

    /// A manager for this database is already active in the registry.
    #[error("a repository manager is already active for {}", .0.display())]
    AlreadyInitializedError(PathBuf),

    /// Operation attempted in the wrong lifecycle state.
    #[error("invalid lifecycle state: expected {expected}, found {found}")]
    LifecycleError {
        expected: ManagerState,
        found: ManagerState,
    },

    /// The connection was closed before the operation ran.
    #[error("connection is closed")]
    ConnectionClosed,

    /// A record does not fit the table it is saved to.
    #[error("record error: {0}")]
    RecordError(String),

    /// File or folder operation failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Configuration file could not be parsed or serialized.
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Configuration values are unusable.
    #[error("invalid configuration: {0}")]
    ConfigError(String),

    /// The blocking task running a statement panicked or was cancelled.
    #[error("database task failed: {0}")]
    TaskError(String),
}

/// Convenience alias for results with [`RepoError`].
pub type Result<T> = std::result::Result<T, RepoError>;
