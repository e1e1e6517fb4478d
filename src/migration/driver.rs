//! The persistence capability consumed by the [`Migrator`](super::Migrator)

use super::error::DriverError;
use std::sync::Mutex;

/// Durable tracking of applied migrations plus a connection for applying them
///
/// Implementations are substitutable without touching the `Migrator`:
/// [`PostgresDriver`](super::PostgresDriver) keeps history in a table,
/// [`MemoryDriver`] keeps it in process.
pub trait MigrationDriver {
    /// Handle passed to [`Migration::apply`](super::Migration::apply)
    type Connection: ?Sized;

    /// Most recently persisted migration id, by durable insertion order
    fn last_migration(&self) -> Result<Option<String>, DriverError>;

    /// Durably record that `id` has been applied, as the next entry in order
    fn save_migration(&self, id: &str) -> Result<(), DriverError>;

    /// Execution context for the next migration
    fn connection(&self) -> Result<&Self::Connection, DriverError>;
}

/// In-process driver: history lives in a `Vec` for the lifetime of the value
///
/// Useful for tests and dry runs against a fake connection.
#[derive(Debug, Default)]
pub struct MemoryDriver<C = ()> {
    connection: C,
    applied: Mutex<Vec<String>>,
}

impl MemoryDriver<()> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C> MemoryDriver<C> {
    pub fn with_connection(connection: C) -> Self {
        Self {
            connection,
            applied: Mutex::new(Vec::new()),
        }
    }

    /// Seed the history as if `ids` had been applied in that order
    #[must_use]
    pub fn with_applied<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut applied) = self.applied.lock() {
            applied.extend(ids.into_iter().map(Into::into));
        }
        self
    }

    /// Every saved id, oldest first
    pub fn applied(&self) -> Vec<String> {
        match self.applied.lock() {
            Ok(applied) => applied.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn connection_ref(&self) -> &C {
        &self.connection
    }
}

impl<C> MigrationDriver for MemoryDriver<C> {
    type Connection = C;

    fn last_migration(&self) -> Result<Option<String>, DriverError> {
        let applied = self
            .applied
            .lock()
            .map_err(|e| DriverError::Other(format!("Failed to lock migration history: {e}")))?;
        Ok(applied.last().cloned())
    }

    fn save_migration(&self, id: &str) -> Result<(), DriverError> {
        let mut applied = self
            .applied
            .lock()
            .map_err(|e| DriverError::Other(format!("Failed to lock migration history: {e}")))?;
        applied.push(id.to_string());
        Ok(())
    }

    fn connection(&self) -> Result<&C, DriverError> {
        Ok(&self.connection)
    }
}
