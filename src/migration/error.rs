//! Migration-specific error types

use crate::ExecutorError;
use std::path::PathBuf;
use thiserror::Error;

/// Error type returned by [`Migration::apply`](super::Migration::apply).
///
/// Whatever the migration raises is carried through to the caller of
/// `migrate()` untouched, as the `source` of [`MigrationError::Apply`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures of a [`MigrationDriver`](super::MigrationDriver)
#[derive(Debug, Error)]
pub enum DriverError {
    /// Database execution error
    #[error("database error: {0}")]
    Database(#[from] ExecutorError),
    /// The state table name is not a plain SQL identifier
    #[error("invalid state table name '{0}': expected letters, digits and underscores (max 63)")]
    InvalidTableName(String),
    /// Any other driver failure
    #[error("{0}")]
    Other(String),
}

/// Migration-specific errors
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The requested (or implicit) target is not a registered migration.
    /// `head` is `None` when nothing is registered and no target was given.
    #[error(
        "incorrect head: {}",
        head.as_deref().map_or_else(|| "no migrations registered".to_string(), |h| format!("migration '{h}' is not registered"))
    )]
    IncorrectHead { head: Option<String> },

    /// Migrations that can never be ordered because of a circular dependency chain
    #[error("dependency cycle: migrations [{}] can never become ready", ids.join(", "))]
    DependencyCycle { ids: Vec<String> },

    /// A migration depends on an id that was never registered
    #[error("migration '{id}' depends on '{dependency}', which is not registered")]
    UnknownDependency { id: String, dependency: String },

    /// A migration with the same id is already registered
    #[error("migration '{id}' is already registered")]
    AlreadyRegistered { id: String },

    /// Migration ids must be non-empty
    #[error("migration id must not be empty")]
    InvalidId,

    /// The migration's own apply step failed; `source` is its error as raised
    #[error("migration '{id}' failed: {source}")]
    Apply {
        id: String,
        #[source]
        source: BoxError,
    },

    /// The driver could not report, persist or connect
    #[error("migration driver error: {0}")]
    Driver(#[from] DriverError),

    /// A migration file exists but could not be understood
    #[error("invalid migration file {}: {message}", path.display())]
    InvalidFile { path: PathBuf, message: String },

    /// A migration file or directory could not be read
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MigrationError {
    /// The id of the migration this error is about, when there is one
    pub fn migration_id(&self) -> Option<&str> {
        match self {
            MigrationError::UnknownDependency { id, .. }
            | MigrationError::AlreadyRegistered { id }
            | MigrationError::Apply { id, .. } => Some(id),
            MigrationError::IncorrectHead { head } => head.as_deref(),
            _ => None,
        }
    }
}

impl From<ExecutorError> for MigrationError {
    fn from(error: ExecutorError) -> Self {
        MigrationError::Driver(DriverError::Database(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_incorrect_head_messages() {
        let empty = MigrationError::IncorrectHead { head: None };
        assert_eq!(empty.to_string(), "incorrect head: no migrations registered");

        let missing = MigrationError::IncorrectHead {
            head: Some("002".to_string()),
        };
        assert_eq!(missing.to_string(), "incorrect head: migration '002' is not registered");
        assert_eq!(missing.migration_id(), Some("002"));
    }

    #[test]
    fn test_apply_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "syntax error at or near \"tabel\"");
        let err = MigrationError::Apply {
            id: "001.sql".to_string(),
            source: Box::new(io),
        };

        assert!(err.to_string().contains("001.sql"));
        let source = err.source().expect("source is kept");
        assert_eq!(source.to_string(), "syntax error at or near \"tabel\"");
        assert!(source.downcast_ref::<std::io::Error>().is_some());
    }

    #[test]
    fn test_cycle_lists_ids() {
        let err = MigrationError::DependencyCycle {
            ids: vec!["a".to_string(), "b".to_string()],
        };
        assert!(err.to_string().contains("[a, b]"));
    }

    #[test]
    fn test_executor_error_converts_to_driver_error() {
        let err: MigrationError = ExecutorError::Other("gone".to_string()).into();
        assert!(matches!(err, MigrationError::Driver(DriverError::Database(_))));
    }
}
