//! migraph Migration CLI Tool
//!
//! Command-line interface for applying dependency-ordered SQL migrations
//! from a directory to a PostgreSQL database.

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::Colorize;
use migraph::config::MigrateConfig;
use migraph::migration::{discover_migrations, register_directory, PostgresMigrator};
use migraph::{connect, PgExecutor};
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(name = "migraph")]
#[command(about = "Dependency-ordered migrations for PostgreSQL")]
#[command(version = "0.1.0")]
struct Cli {
    /// Database connection URL
    #[arg(long)]
    database_url: Option<String>,

    /// Migrations directory path
    #[arg(long)]
    migrations_dir: Option<PathBuf>,

    /// State table recording applied migrations
    #[arg(long)]
    table: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show migration status (applied vs pending)
    Status,

    /// Apply pending migrations
    Up {
        /// Migrate up to this migration instead of the head
        #[arg(long)]
        head: Option<String>,

        /// Dry run - show what would be executed without running
        #[arg(long)]
        dry_run: bool,
    },

    /// List migrations in execution order
    List,

    /// Create a new migration file depending on the current head
    New {
        /// Migration name (e.g., "create_users_table")
        name: String,
    },
}

/// Settings after merging flags, environment and config file
struct Settings {
    database_url: String,
    migrations_dir: PathBuf,
    table_name: String,
}

impl Settings {
    fn resolve(cli: &Cli) -> anyhow::Result<Self> {
        let config = MigrateConfig::load().context("failed to load configuration")?;
        let database_url = cli
            .database_url
            .clone()
            .or_else(|| std::env::var("MIGRAPH_DATABASE_URL").ok())
            .or_else(|| std::env::var("DATABASE_URL").ok())
            .unwrap_or(config.database_url);

        Ok(Self {
            database_url,
            migrations_dir: cli.migrations_dir.clone().unwrap_or(config.migrations_dir),
            table_name: cli.table.clone().unwrap_or(config.table_name),
        })
    }

    fn open(&self) -> anyhow::Result<PostgresMigrator<PgExecutor>> {
        let client = connect(&self.database_url).context("failed to connect to database")?;
        let mut migrator = PostgresMigrator::postgres_with_table(PgExecutor::new(client), &self.table_name)?;
        let ids = register_directory(&mut migrator, &self.migrations_dir)?;
        log::debug!("registered {} migration(s) from {}", ids.len(), self.migrations_dir.display());
        Ok(migrator)
    }
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(&cli) {
        eprintln!("{} {e:#}", "error:".red().bold());
        process::exit(1);
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let settings = Settings::resolve(cli)?;
    match &cli.command {
        Commands::Status => handle_status(&settings.open()?),
        Commands::Up { head, dry_run } => handle_up(&settings.open()?, head.as_deref(), *dry_run),
        Commands::List => handle_list(&settings.open()?),
        Commands::New { name } => {
            let path = scaffold(&settings.migrations_dir, name)?;
            println!("{} {}", "created".green(), path.display());
            Ok(())
        }
    }
}

fn handle_status(migrator: &PostgresMigrator<PgExecutor>) -> anyhow::Result<()> {
    let status = migrator.status()?;
    let applied_at: HashMap<_, _> = migrator
        .driver()
        .records()?
        .into_iter()
        .map(|record| (record.id, record.applied_at))
        .collect();

    println!("\n{}\n", "Migration Status".bold());

    if status.is_watermark_unknown() {
        println!(
            "{} last applied migration {} is not in the migrations directory",
            "warning:".yellow().bold(),
            status.watermark.as_deref().unwrap_or_default()
        );
    }

    if status.applied.is_empty() {
        println!("Applied Migrations: None");
    } else {
        println!("Applied Migrations ({}):", status.applied_count);
        for id in &status.applied {
            let when = applied_at
                .get(id)
                .map_or_else(|| "N/A".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string());
            println!("  {} {id} ({when})", "✓".green());
        }
    }

    println!();

    if status.pending.is_empty() {
        println!("Pending Migrations: None");
    } else {
        println!("Pending Migrations ({}):", status.pending_count);
        for id in &status.pending {
            println!("  {} {id}", "…".yellow());
        }
    }

    println!("\nSummary: {} applied, {} pending", status.applied_count, status.pending_count);
    Ok(())
}

fn handle_up(migrator: &PostgresMigrator<PgExecutor>, head: Option<&str>, dry_run: bool) -> anyhow::Result<()> {
    if dry_run {
        let plan = migrator.plan(head)?;
        if plan.is_empty() {
            println!("No pending migrations to apply");
        } else {
            println!("Would apply {} migration(s):", plan.len());
            for (i, id) in plan.iter().enumerate() {
                println!("  {}. {id}", i + 1);
            }
        }
        return Ok(());
    }

    let mut applied = 0;
    for result in migrator.migrate(head)? {
        let id = result?;
        println!("  {} {id}", "✓".green());
        applied += 1;
    }

    if applied > 0 {
        println!("{} applied {applied} migration(s)", "done:".green().bold());
    } else {
        println!("No migrations to apply");
    }
    Ok(())
}

fn handle_list(migrator: &PostgresMigrator<PgExecutor>) -> anyhow::Result<()> {
    let status = migrator.status()?;
    for id in migrator.sorted_ids()? {
        let marker = if status.applied.contains(&id) {
            "✓".green()
        } else {
            " ".normal()
        };
        let deps = migrator.registry().dependencies(&id).unwrap_or_default();
        if deps.is_empty() {
            println!("[{marker}] {id}");
        } else {
            println!("[{marker}] {id} {}", format!("<- {}", deps.join(", ")).dimmed());
        }
    }
    Ok(())
}

/// Write `NNN_name.sql`, depending on the last file of `migrations_dir`
fn scaffold(migrations_dir: &Path, name: &str) -> anyhow::Result<PathBuf> {
    let valid_name = Regex::new(r"^[A-Za-z0-9_]+$")?;
    if !valid_name.is_match(name) {
        bail!("migration name '{name}' may only contain letters, digits and underscores");
    }

    fs::create_dir_all(migrations_dir)
        .with_context(|| format!("failed to create {}", migrations_dir.display()))?;

    let existing = discover_migrations(migrations_dir)?;
    let file_name = |path: &Path| path.file_name().map(|n| n.to_string_lossy().into_owned());
    let head = existing.last().and_then(|m| file_name(m.path()));

    let number_prefix = Regex::new(r"^(\d+)_")?;
    let next = head
        .as_deref()
        .and_then(|h| number_prefix.captures(h))
        .and_then(|caps| caps[1].parse::<u32>().ok())
        .map_or(existing.len() as u32 + 1, |n| n + 1);

    let path = migrations_dir.join(format!("{next:03}_{name}.sql"));
    if path.exists() {
        bail!("{} already exists", path.display());
    }

    let mut template = format!("-- {name}\n-- created {}\n", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(head) = &head {
        template.push_str(&format!("-- depends: {head}\n"));
    }
    template.push('\n');

    fs::write(&path, template).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}
