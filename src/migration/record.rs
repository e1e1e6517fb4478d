//! `MigrationRecord` - Represents entries in the migration state table

use crate::ExecutorError;
use chrono::{DateTime, Utc};

/// One row of the state table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    /// Insertion order; the greatest value is the watermark
    pub order: i32,

    /// Migration id
    pub id: String,

    /// When the migration was recorded
    pub applied_at: DateTime<Utc>,
}

impl MigrationRecord {
    #[must_use]
    pub fn new(order: i32, id: String, applied_at: DateTime<Utc>) -> Self {
        Self { order, id, applied_at }
    }

    /// Create a `MigrationRecord` from database row
    ///
    /// Expected column order: `order`, `id`, `applied_at`
    ///
    /// # Errors
    ///
    /// Returns `ExecutorError::ParseError` if a column is missing or has an unexpected type.
    pub fn from_row(row: &may_postgres::Row) -> Result<Self, ExecutorError> {
        let order: i32 = row
            .try_get(0)
            .map_err(|e| ExecutorError::ParseError(format!("order: {e}")))?;
        let id: String = row
            .try_get(1)
            .map_err(|e| ExecutorError::ParseError(format!("id: {e}")))?;
        let applied_at: DateTime<Utc> = row
            .try_get(2)
            .map_err(|e| ExecutorError::ParseError(format!("applied_at: {e}")))?;

        Ok(Self { order, id, applied_at })
    }
}
