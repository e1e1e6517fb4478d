//! # migraph
//!
//! Dependency-graph schema migrations for PostgreSQL on the `may` coroutine runtime.
//!
//! Migrations declare which other migrations they depend on; the
//! [`Migrator`](migration::Migrator) orders them, asks a
//! [`MigrationDriver`](migration::MigrationDriver) what has already run, and
//! applies the rest one at a time.

pub mod config;
pub mod connection;
pub mod executor;
pub mod metrics;
pub mod migration;

pub use connection::{connect, ConnectionError};
pub use executor::{Executor, ExecutorError, PgExecutor};
pub use migration::{
    FileMigration, Migration, MigrationDriver, MigrationError, Migrator, PostgresDriver, PostgresMigrator,
};
