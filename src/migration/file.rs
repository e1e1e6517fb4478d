//! Migration file discovery and parsing
//!
//! A file migration is a plain SQL script. Its dependencies are declared in
//! leading comment lines:
//!
//! ```sql
//! -- depends: 001_users.sql, 002_teams.sql
//! CREATE TABLE memberships (...);
//! ```
//!
//! Dependency names are resolved relative to the directory of the file.

use crate::migration::{BoxError, Migration, MigrationDriver, MigrationError, Migrator};
use crate::Executor;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

static DEPENDS_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^--\s*depends:\s*(.*)$").expect("depends header pattern is valid"));

/// A migration backed by a SQL file
#[derive(Debug, Clone)]
pub struct FileMigration {
    path: PathBuf,
    id: String,
    sql: Option<String>,
    dependencies: Vec<String>,
    declared: bool,
}

impl FileMigration {
    /// Migration for `path` without touching the filesystem
    ///
    /// The id is the path as given; the script is read when applied.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            id: path.display().to_string(),
            path,
            sql: None,
            dependencies: Vec::new(),
            declared: false,
        }
    }

    /// Read `path` and parse its `-- depends:` header
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be read, `InvalidFile` if a header lists an
    /// empty dependency name.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, MigrationError> {
        let mut migration = Self::new(path);
        let sql = fs::read_to_string(&migration.path).map_err(|source| MigrationError::Io {
            path: migration.path.clone(),
            source,
        })?;

        let base = migration.path.parent().unwrap_or_else(|| Path::new(""));
        for line in sql.lines().map(str::trim) {
            if line.is_empty() {
                continue;
            }
            if !line.starts_with("--") {
                break;
            }
            let Some(caps) = DEPENDS_HEADER.captures(line) else {
                continue;
            };
            migration.declared = true;
            for name in caps[1].split(',').map(str::trim) {
                if name.is_empty() {
                    return Err(MigrationError::InvalidFile {
                        path: migration.path.clone(),
                        message: format!("empty dependency name in header '{line}'"),
                    });
                }
                let dependency = base.join(name).display().to_string();
                if !migration.dependencies.contains(&dependency) {
                    migration.dependencies.push(dependency);
                }
            }
        }

        migration.sql = Some(sql);
        Ok(migration)
    }

    /// Replace the dependencies, marking them as declared
    #[must_use]
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self.declared = true;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Script contents, if the file has been loaded
    pub fn sql(&self) -> Option<&str> {
        self.sql.as_deref()
    }

    /// Whether the file carries a `-- depends:` header
    pub fn has_declared_dependencies(&self) -> bool {
        self.declared
    }
}

impl<C: Executor + ?Sized> Migration<C> for FileMigration {
    fn id(&self) -> &str {
        &self.id
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    fn apply(&self, connection: &C) -> Result<(), BoxError> {
        match &self.sql {
            Some(sql) => connection.batch_execute(sql)?,
            None => {
                let sql = fs::read_to_string(&self.path)?;
                connection.batch_execute(&sql)?;
            }
        }
        Ok(())
    }
}

/// Discover all migration files in a directory
///
/// Loads every `*.sql` file directly inside `migrations_dir`, sorted by file
/// name. A missing directory yields no migrations.
///
/// # Errors
///
/// `Io` if the directory or a file cannot be read, `InvalidFile` for a
/// malformed header.
pub fn discover_migrations(migrations_dir: impl AsRef<Path>) -> Result<Vec<FileMigration>, MigrationError> {
    let dir = migrations_dir.as_ref();
    if !dir.exists() {
        log::debug!("migrations directory {} does not exist", dir.display());
        return Ok(Vec::new());
    }

    let io_error = |source: std::io::Error| MigrationError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "sql") {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    paths.into_iter().map(FileMigration::load).collect()
}

/// Register every migration of `migrations_dir` with `migrator`
///
/// Files are registered in file-name order. A file with a `depends` header
/// uses exactly its header; a file without one chains onto the current head.
/// Returns the registered ids.
pub fn register_directory<D>(
    migrator: &mut Migrator<D>,
    migrations_dir: impl AsRef<Path>,
) -> Result<Vec<String>, MigrationError>
where
    D: MigrationDriver,
    D::Connection: Executor,
{
    let mut ids = Vec::new();
    for migration in discover_migrations(migrations_dir)? {
        let depends_on_head = !migration.has_declared_dependencies();
        ids.push(migrator.use_migration(migration, depends_on_head)?.to_string());
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::MemoryDriver;
    use crate::ExecutorError;
    use may_postgres::types::ToSql;
    use may_postgres::Row;
    use std::cell::RefCell;
    use tempfile::TempDir;

    #[derive(Default)]
    struct ScriptLog {
        scripts: RefCell<Vec<String>>,
    }

    impl Executor for ScriptLog {
        fn execute(&self, _query: &str, _params: &[&dyn ToSql]) -> Result<u64, ExecutorError> {
            Ok(0)
        }

        fn query_one(&self, _query: &str, _params: &[&dyn ToSql]) -> Result<Row, ExecutorError> {
            Err(ExecutorError::Other("no rows".to_string()))
        }

        fn query_all(&self, _query: &str, _params: &[&dyn ToSql]) -> Result<Vec<Row>, ExecutorError> {
            Ok(Vec::new())
        }

        fn batch_execute(&self, sql: &str) -> Result<(), ExecutorError> {
            if sql.contains("BROKEN") {
                return Err(ExecutorError::QueryError("syntax error at or near \"BROKEN\"".to_string()));
            }
            self.scripts.borrow_mut().push(sql.trim().to_string());
            Ok(())
        }
    }

    fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).expect("write migration file");
        path
    }

    #[test]
    fn test_id_is_path() {
        let migration = FileMigration::new("/");
        assert_eq!(Migration::<ScriptLog>::id(&migration), "/");
        assert_eq!(migration.path(), Path::new("/"));
        assert!(migration.sql().is_none());
    }

    #[test]
    fn test_load_parses_depends_header() {
        let dir = TempDir::new().expect("tempdir");
        let path = write(
            &dir,
            "003_members.sql",
            "-- memberships\n-- Depends: 001_users.sql, 002_teams.sql,001_users.sql\nCREATE TABLE m (id int);\n-- depends: ignored.sql\n",
        );

        let migration = FileMigration::load(&path).expect("load");
        assert!(migration.has_declared_dependencies());
        let deps = Migration::<ScriptLog>::dependencies(&migration);
        assert_eq!(
            deps,
            [
                dir.path().join("001_users.sql").display().to_string(),
                dir.path().join("002_teams.sql").display().to_string(),
            ]
        );
    }

    #[test]
    fn test_empty_dependency_name_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let path = write(&dir, "001_root.sql", "-- depends:\nSELECT 1;\n");
        let err = FileMigration::load(&path).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidFile { .. }));
    }

    #[test]
    fn test_apply_runs_script_verbatim() {
        let dir = TempDir::new().expect("tempdir");
        let path = write(&dir, "001_test.sql", "create table \"Test\"(id serial primary key);");
        let log = ScriptLog::default();

        FileMigration::new(&path).apply(&log).expect("apply");
        FileMigration::load(&path).expect("load").apply(&log).expect("apply");
        assert_eq!(
            *log.scripts.borrow(),
            vec!["create table \"Test\"(id serial primary key);"; 2]
        );
    }

    #[test]
    fn test_apply_error_is_the_executor_error() {
        let dir = TempDir::new().expect("tempdir");
        let path = write(&dir, "001_broken.sql", "BROKEN;");
        let err = FileMigration::load(&path).expect("load").apply(&ScriptLog::default()).unwrap_err();
        assert!(matches!(err.downcast_ref::<ExecutorError>(), Some(ExecutorError::QueryError(_))));
    }

    #[test]
    fn test_discover_sorts_by_file_name_and_skips_other_files() {
        let dir = TempDir::new().expect("tempdir");
        write(&dir, "002_b.sql", "SELECT 2;");
        write(&dir, "010_c.sql", "SELECT 3;");
        write(&dir, "001_a.sql", "SELECT 1;");
        write(&dir, "README.md", "notes");

        let names: Vec<_> = discover_migrations(dir.path())
            .expect("discover")
            .iter()
            .map(|m| m.path().file_name().expect("name").to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["001_a.sql", "002_b.sql", "010_c.sql"]);
    }

    #[test]
    fn test_discover_missing_directory_is_empty() {
        let dir = TempDir::new().expect("tempdir");
        assert!(discover_migrations(dir.path().join("nope")).expect("discover").is_empty());
    }

    #[test]
    fn test_register_directory_chains_undeclared_files() {
        let dir = TempDir::new().expect("tempdir");
        let a = write(&dir, "001_a.sql", "SELECT 1;");
        let b = write(&dir, "002_b.sql", "SELECT 2;");
        let c = write(&dir, "003_c.sql", "-- depends: 001_a.sql\nSELECT 3;");

        let mut migrator = Migrator::new(MemoryDriver::with_connection(ScriptLog::default()));
        let ids = register_directory(&mut migrator, dir.path()).expect("register");
        let [a, b, c] = [a, b, c].map(|p| p.display().to_string());
        assert_eq!(ids, vec![a.clone(), b.clone(), c.clone()]);

        assert_eq!(migrator.registry().dependencies(&b).expect("b"), [a.clone()]);
        assert_eq!(migrator.registry().dependencies(&c).expect("c"), [a.clone()]);
        assert_eq!(migrator.closure(&c).expect("closure"), vec![a.clone(), c.clone()]);

        let applied = migrator
            .migrate(None)
            .expect("migrate")
            .collect::<Result<Vec<_>, _>>()
            .expect("run");
        assert_eq!(applied, vec![a, c]);
        assert_eq!(*migrator.driver().connection_ref().scripts.borrow(), vec!["SELECT 1;", "SELECT 3;"]);
    }
}
