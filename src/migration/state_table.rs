//! Migration state table management
//!
//! [`PostgresDriver`] keeps the history of applied migrations in a table
//! (by default `migraph_migrations`) with one row per migration:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS "migraph_migrations" (
//!     "order" SERIAL PRIMARY KEY,
//!     id VARCHAR(255) NOT NULL,
//!     applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
//! )
//! ```

use crate::migration::{DriverError, MigrationDriver, MigrationRecord};
use crate::Executor;
use once_cell::sync::Lazy;
use regex::Regex;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Default name of the state table
pub const DEFAULT_TABLE_NAME: &str = "migraph_migrations";

static TABLE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("table name pattern is valid"));

/// Check that `name` can be interpolated as a quoted identifier
pub fn validate_table_name(name: &str) -> Result<(), DriverError> {
    if TABLE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(DriverError::InvalidTableName(name.to_string()))
    }
}

/// Create the state table if it does not exist yet
///
/// # Errors
///
/// Returns `DriverError::InvalidTableName` for a name that is not a plain
/// identifier, or `DriverError::Database` if the statement fails.
pub fn initialize_state_table<E: Executor + ?Sized>(executor: &E, table_name: &str) -> Result<(), DriverError> {
    validate_table_name(table_name)?;
    let sql = format!(
        r#"CREATE TABLE IF NOT EXISTS "{table_name}" (
            "order" SERIAL PRIMARY KEY,
            id VARCHAR(255) NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#
    );
    executor.execute(&sql, &[])?;
    Ok(())
}

/// [`MigrationDriver`] backed by a PostgreSQL table
///
/// Migrations registered against it receive the executor itself as their
/// connection. The table is created on construction.
pub struct PostgresDriver<E: Executor> {
    executor: E,
    table_name: String,
}

impl<E: Executor> PostgresDriver<E> {
    /// Driver over the default `migraph_migrations` table
    pub fn new(executor: E) -> Result<Self, DriverError> {
        Self::with_table(executor, DEFAULT_TABLE_NAME)
    }

    /// Driver over a custom state table
    pub fn with_table(executor: E, table_name: impl Into<String>) -> Result<Self, DriverError> {
        let table_name = table_name.into();
        initialize_state_table(&executor, &table_name)?;
        log::debug!("migration state table \"{table_name}\" ready");
        Ok(Self { executor, table_name })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn into_executor(self) -> E {
        self.executor
    }

    /// Full history, oldest first
    pub fn records(&self) -> Result<Vec<MigrationRecord>, DriverError> {
        let sql = format!(
            r#"SELECT "order", id, applied_at FROM "{}" ORDER BY "order" ASC"#,
            self.table_name
        );
        let rows = self.executor.query_all(&sql, &[])?;
        let records = rows
            .iter()
            .map(MigrationRecord::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

impl<E: Executor> MigrationDriver for PostgresDriver<E> {
    type Connection = E;

    fn last_migration(&self) -> Result<Option<String>, DriverError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::driver_span("postgres.last_migration").entered();

        let sql = format!(
            r#"SELECT id FROM "{}" ORDER BY "order" DESC LIMIT 1"#,
            self.table_name
        );
        let rows = self.executor.query_all(&sql, &[])?;
        match rows.first() {
            Some(row) => {
                let id: String = row
                    .try_get(0)
                    .map_err(|e| crate::ExecutorError::ParseError(format!("id: {e}")))?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    fn save_migration(&self, id: &str) -> Result<(), DriverError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::driver_span("postgres.save_migration").entered();

        let sql = format!(r#"INSERT INTO "{}" (id) VALUES ($1)"#, self.table_name);
        self.executor.execute(&sql, &[&id])?;
        Ok(())
    }

    fn connection(&self) -> Result<&E, DriverError> {
        Ok(&self.executor)
    }
}

impl<E: Executor> std::fmt::Debug for PostgresDriver<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresDriver")
            .field("table_name", &self.table_name)
            .finish_non_exhaustive()
    }
}
