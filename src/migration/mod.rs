//! Dependency-ordered migrations
//!
//! This module provides:
//! - the [`Migration`] trait and [`FnMigration`] for inline migrations
//! - [`MigrationDriver`], the persistence capability, with an in-memory
//!   and a PostgreSQL implementation
//! - [`Migrator`], which orders registered migrations by their dependencies
//!   and applies the ones a target still needs
//! - SQL file migrations and startup helpers
//!
//! # Example
//!
//! ```rust
//! use migraph::migration::{BoxError, FnMigration, MemoryDriver, Migrator};
//!
//! let mut migrator = Migrator::new(MemoryDriver::new());
//! let users = FnMigration::new("001_users", |_: &()| -> Result<(), BoxError> { Ok(()) });
//! let teams = FnMigration::new("002_teams", |_: &()| -> Result<(), BoxError> { Ok(()) });
//! let members = FnMigration::new("003_members", |_: &()| -> Result<(), BoxError> { Ok(()) })
//!     .depends_on(["001_users", "002_teams"]);
//!
//! migrator.use_migration(users, false)?;
//! migrator.use_migration(teams, false)?;
//! migrator.use_migration(members, false)?;
//!
//! assert_eq!(migrator.sorted_ids()?, ["001_users", "002_teams", "003_members"]);
//! assert_eq!(migrator.closure("001_users")?, ["001_users"]);
//! # Ok::<(), migraph::migration::MigrationError>(())
//! ```

pub mod driver;
pub mod error;
pub mod file;
pub mod migration;
pub mod migrator;
pub mod record;
pub mod registry;
pub mod startup;
pub mod state_table;
pub mod status;

pub use driver::{MemoryDriver, MigrationDriver};
pub use error::{BoxError, DriverError, MigrationError};
pub use file::{discover_migrations, register_directory, FileMigration};
pub use migration::{FnMigration, Migration};
pub use migrator::{Migrate, Migrator};
pub use record::MigrationRecord;
pub use registry::MigrationRegistry;
pub use startup::{startup_migrations, PostgresMigrator};
pub use state_table::{initialize_state_table, validate_table_name, PostgresDriver, DEFAULT_TABLE_NAME};
pub use status::MigrationStatus;
