//! Migration trait definition

use super::error::BoxError;
use std::fmt;

/// A single identified, dependency-bearing unit of schema change
///
/// `C` is the connection handle the owning driver hands out
/// (see [`MigrationDriver::Connection`](super::MigrationDriver::Connection)).
///
/// Note: migrations are synchronous. Under the `may` runtime a blocking
/// call inside `apply` suspends the current coroutine, not the thread.
pub trait Migration<C: ?Sized> {
    /// Stable identifier, used as the graph key and as the durable record key
    fn id(&self) -> &str;

    /// Ids this migration must run after
    fn dependencies(&self) -> &[String] {
        &[]
    }

    /// Perform the schema change against `connection`
    ///
    /// Errors must be returned, not swallowed: they halt the run and reach
    /// the caller unchanged.
    fn apply(&self, connection: &C) -> Result<(), BoxError>;
}

/// A migration defined inline from a closure
///
/// ```
/// use migraph::migration::{FnMigration, Migration, BoxError};
///
/// let m = FnMigration::new("002_add_email", |_conn: &()| -> Result<(), BoxError> { Ok(()) })
///     .depends_on(["001_create_users"]);
/// assert_eq!(Migration::<()>::dependencies(&m), ["001_create_users".to_string()]);
/// ```
pub struct FnMigration<F> {
    id: String,
    dependencies: Vec<String>,
    apply: F,
}

impl<F> FnMigration<F> {
    pub fn new(id: impl Into<String>, apply: F) -> Self {
        Self {
            id: id.into(),
            dependencies: Vec::new(),
            apply,
        }
    }

    /// Append dependencies, keeping their order
    #[must_use]
    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(dependencies.into_iter().map(Into::into));
        self
    }
}

impl<C: ?Sized, F> Migration<C> for FnMigration<F>
where
    F: Fn(&C) -> Result<(), BoxError>,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    fn apply(&self, connection: &C) -> Result<(), BoxError> {
        (self.apply)(connection)
    }
}

impl<F> fmt::Debug for FnMigration<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMigration")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}
