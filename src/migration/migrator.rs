//! Migrator - Core migration resolution and execution engine

use crate::migration::{
    Migration, MigrationDriver, MigrationError, MigrationRegistry, MigrationStatus,
};
use std::collections::VecDeque;
use std::fmt;
use std::iter::FusedIterator;
use std::time::Instant;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Core migration engine
///
/// Owns the dependency graph of registered migrations and the head pointer,
/// and drives a [`MigrationDriver`] to find out what already ran and to
/// record what runs next.
///
/// ```
/// use migraph::migration::{BoxError, FnMigration, MemoryDriver, Migrator};
///
/// fn noop(_: &()) -> Result<(), BoxError> {
///     Ok(())
/// }
///
/// let mut migrator = Migrator::new(MemoryDriver::new());
/// migrator.use_migration(FnMigration::new("001_users", noop), false)?;
/// migrator.use_migration(FnMigration::new("002_emails", noop), true)?;
///
/// let applied = migrator.migrate(None)?.collect::<Result<Vec<_>, _>>()?;
/// assert_eq!(applied, ["001_users", "002_emails"]);
/// # Ok::<(), migraph::migration::MigrationError>(())
/// ```
pub struct Migrator<D: MigrationDriver> {
    driver: D,
    registry: MigrationRegistry<D::Connection>,
}

impl<D: MigrationDriver> Migrator<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            registry: MigrationRegistry::new(),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    pub fn registry(&self) -> &MigrationRegistry<D::Connection> {
        &self.registry
    }

    /// Register a migration; it becomes the new head, which is returned
    ///
    /// With `depends_on_head`, the previous head (if any) is added to the
    /// migration's dependencies.
    ///
    /// # Errors
    ///
    /// `AlreadyRegistered` for a duplicate id, `InvalidId` for an empty one.
    pub fn use_migration<M>(&mut self, migration: M, depends_on_head: bool) -> Result<&str, MigrationError>
    where
        M: Migration<D::Connection> + 'static,
    {
        self.registry.register(Box::new(migration), depends_on_head)
    }

    /// [`use_migration`](Self::use_migration) for an already boxed migration
    pub fn use_boxed(
        &mut self,
        migration: Box<dyn Migration<D::Connection>>,
        depends_on_head: bool,
    ) -> Result<&str, MigrationError> {
        self.registry.register(migration, depends_on_head)
    }

    /// Id of the most recently registered migration
    pub fn head(&self) -> Option<&str> {
        self.registry.head()
    }

    pub fn get(&self, id: &str) -> Option<&dyn Migration<D::Connection>> {
        self.registry.get(id)
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Ids in registration order
    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.registry.ids()
    }

    /// Every registered id, dependencies first, ties in registration order
    pub fn sorted_ids(&self) -> Result<Vec<String>, MigrationError> {
        self.registry.sorted_ids()
    }

    /// `target` and its transitive dependencies, in execution order
    pub fn closure(&self, target: &str) -> Result<Vec<String>, MigrationError> {
        self.registry.closure(target)
    }

    /// What [`migrate`](Self::migrate) would apply, without applying anything
    pub fn plan(&self, head: Option<&str>) -> Result<Vec<String>, MigrationError> {
        let (_, pending) = self.work_list(head)?;
        Ok(pending.into_iter().map(|idx| self.registry.id_at(idx).to_string()).collect())
    }

    /// Apply everything `head` (default: the current head) needs that has not run yet
    ///
    /// Target resolution, ordering and the watermark query all happen here,
    /// before any migration runs; the returned cursor then applies one
    /// migration per `next()`, persisting its id before yielding it.
    /// Dropping the cursor early leaves the remaining migrations unapplied.
    ///
    /// # Errors
    ///
    /// `IncorrectHead` if nothing is registered (and no head was given) or
    /// the head is not registered; `UnknownDependency` / `DependencyCycle`
    /// if the closure cannot be ordered; `Driver` if the watermark cannot
    /// be read.
    pub fn migrate(&self, head: Option<&str>) -> Result<Migrate<'_, D>, MigrationError> {
        let (target, pending) = self.work_list(head)?;
        log::debug!("migrating to {target}: {} migration(s) pending", pending.len());
        Ok(Migrate {
            migrator: self,
            target,
            pending: pending.into(),
            halted: false,
        })
    }

    /// Suffix of [`sorted_ids`](Self::sorted_ids) after the driver's watermark
    ///
    /// Everything when nothing was applied yet; empty when the watermark is
    /// not a registered migration.
    pub fn next_ids(&self) -> Result<Vec<String>, MigrationError> {
        let sorted = self.registry.sorted_ids()?;
        match self.watermark()? {
            None => Ok(sorted),
            Some(last) => Ok(match sorted.iter().position(|id| *id == last) {
                Some(pos) => sorted[pos + 1..].to_vec(),
                None => Vec::new(),
            }),
        }
    }

    /// The registered migration matching the driver's watermark, if any
    pub fn last_applied(&self) -> Result<Option<&dyn Migration<D::Connection>>, MigrationError> {
        Ok(self.watermark()?.and_then(|last| self.registry.get(&last)))
    }

    /// Sorted ids split around the watermark
    pub fn status(&self) -> Result<MigrationStatus, MigrationError> {
        let sorted = self.registry.sorted_ids()?;
        let watermark = self.watermark()?;
        Ok(MigrationStatus::from_sorted(sorted, watermark))
    }

    fn watermark(&self) -> Result<Option<String>, MigrationError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::driver_span("last_migration").entered();

        Ok(self.driver.last_migration()?)
    }

    fn work_list(&self, head: Option<&str>) -> Result<(String, Vec<usize>), MigrationError> {
        let target = match head.or_else(|| self.registry.head()) {
            Some(target) if self.registry.contains(target) => target.to_string(),
            other => {
                return Err(MigrationError::IncorrectHead {
                    head: other.map(str::to_string),
                })
            }
        };

        let closure = self.registry.closure_order(&target)?;
        let pending = match self.watermark()? {
            None => closure,
            Some(last) => match closure.iter().position(|&idx| self.registry.id_at(idx) == last) {
                Some(pos) => closure[pos + 1..].to_vec(),
                None => {
                    log::warn!(
                        "last applied migration {last} is not an ancestor of {target}; applying the full closure"
                    );
                    closure
                }
            },
        };

        Ok((target, pending))
    }

    fn apply_at(&self, idx: usize) -> Result<String, MigrationError> {
        let id = self.registry.id_at(idx);

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::apply_migration_span(id).entered();

        let start = Instant::now();
        let result = self.apply_and_save(idx, id);

        match &result {
            Ok(()) => {
                log::info!("applied migration {id} in {:?}", start.elapsed());
                #[cfg(feature = "metrics")]
                METRICS.record_applied(id, start.elapsed());
            }
            Err(_) => {
                #[cfg(feature = "metrics")]
                METRICS.record_failure(id);
            }
        }

        result.map(|()| id.to_string())
    }

    fn apply_and_save(&self, idx: usize, id: &str) -> Result<(), MigrationError> {
        let connection = self.driver.connection()?;
        self.registry
            .migration_at(idx)
            .apply(connection)
            .map_err(|source| MigrationError::Apply {
                id: id.to_string(),
                source,
            })?;
        self.driver.save_migration(id)?;
        Ok(())
    }
}

impl<D: MigrationDriver + fmt::Debug> fmt::Debug for Migrator<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migrator")
            .field("driver", &self.driver)
            .field("registry", &self.registry)
            .field("head", &self.registry.head())
            .finish()
    }
}

/// Forward-only cursor over one migration run
///
/// Each item is the id of a migration that has just been applied and
/// persisted. The first error ends the run: it is yielded once and the
/// cursor is exhausted afterwards.
pub struct Migrate<'a, D: MigrationDriver> {
    migrator: &'a Migrator<D>,
    target: String,
    pending: VecDeque<usize>,
    halted: bool,
}

impl<D: MigrationDriver> Migrate<'_, D> {
    /// The migration this run resolves to
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Ids still to be applied, in order
    pub fn pending(&self) -> Vec<&str> {
        self.pending
            .iter()
            .map(|&idx| self.migrator.registry.id_at(idx))
            .collect()
    }
}

impl<D: MigrationDriver> Iterator for Migrate<'_, D> {
    type Item = Result<String, MigrationError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.halted {
            return None;
        }
        let idx = self.pending.pop_front()?;
        let result = self.migrator.apply_at(idx);
        if result.is_err() {
            self.halted = true;
            self.pending.clear();
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.halted {
            (0, Some(0))
        } else {
            (0, Some(self.pending.len()))
        }
    }
}

impl<D: MigrationDriver> FusedIterator for Migrate<'_, D> {}
