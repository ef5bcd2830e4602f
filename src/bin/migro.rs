//! migro — the migro CLI
//!
//! Generates goose migrations from column specs and keeps goose moving when
//! its ledger and the migration directory disagree.
//!
//! # Usage
//!
//! ```bash
//! # New table
//! migro create-table users "email:string:not_null:unique,tags:text:array"
//!
//! # Apply, reconciling drift
//! migro migrate
//!
//! # Undo the last two migrations
//! migro rollback 2
//! ```

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use colored::*;
use migro::drift::CleanupReport;
use migro::ops::{self, RollbackOutcome};
use migro::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "migro")]
#[command(version)]
#[command(about = "Column specs to goose migrations, with drift reconciliation", long_about = None)]
#[command(after_help = "EXAMPLES:
    migro create-table users 'email:string:not_null:unique,age:int:default=18'
    migro add-column users 'bio:text,tags:text:array'
    migro delete-column users bio
    migro migrate
    migro rollback 2 --cleanup")]
struct Cli {
    /// Config file (default: migro.toml, .migro.toml, then the user config dir)
    #[arg(short, long, global = true, env = "MIGRO_CONFIG")]
    config: Option<PathBuf>,

    /// Database connection URL, overriding the config file
    #[arg(long, global = true, env = "MIGRO_DATABASE_URL")]
    database_url: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a migration creating a table
    CreateTable {
        table: String,
        /// Column specs: name:type[:option]*,...
        columns: String,
    },
    /// Generate a migration adding columns to a table
    AddColumn {
        table: String,
        /// Column specs: name:type[:option]*,...
        columns: String,
    },
    /// Generate a migration dropping columns from a table
    DeleteColumn {
        table: String,
        /// Column names: a,b,c
        columns: String,
    },
    /// Generate an empty migration template
    CreateMigration { name: String },
    /// Apply all pending migrations
    Migrate,
    /// Roll back the most recent migrations
    Rollback {
        #[arg(default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        count: u32,
        #[command(flatten)]
        cleanup: CleanupChoice,
    },
    /// Roll back every migration
    RollbackAll {
        #[command(flatten)]
        cleanup: CleanupChoice,
    },
    /// Show applied and local migrations
    Status {
        /// Print applied/local/missing versions as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the query code generator
    Generate,
    /// Write the code generator configuration
    GenerateInit {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },
    /// List the columns of a table
    ReadTable { table: String },
    /// Delete every placeholder migration
    Cleanup,
}

#[derive(Args)]
struct CleanupChoice {
    /// Delete placeholders written during the rollback without asking
    #[arg(long, conflicts_with = "keep")]
    cleanup: bool,
    /// Keep placeholders written during the rollback without asking
    #[arg(long)]
    keep: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(&cli).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(depth) = e.downcast_ref::<MigroError>().and_then(|e| e.recommended_rollback()) {
            eprintln!(
                "{} run {} then {}",
                "Hint:".yellow().bold(),
                format!("migro rollback {}", depth).cyan(),
                "migro migrate".cyan()
            );
        }
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "migro=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<MigroConfig> {
    let cwd = std::env::current_dir().context("cannot determine working directory")?;
    let (config, path) = MigroConfig::discover(cli.config.as_deref(), &cwd)?;
    if cli.verbose {
        println!("{} {}", "Config:".dimmed(), path.display());
    }
    Ok(match &cli.database_url {
        Some(url) => config.with_database_url(url),
        None => config,
    })
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let dir = MigrationDir::new(&config.migration_dir);

    match &cli.command {
        Commands::CreateTable { table, columns } => {
            let probe = connect(&config).await?;
            let path = ops::create_table(&dir, &probe, table, columns).await?;
            created(&path);
        }
        Commands::AddColumn { table, columns } => {
            let probe = connect(&config).await?;
            let path = ops::add_columns(&dir, &probe, table, columns).await?;
            created(&path);
        }
        Commands::DeleteColumn { table, columns } => {
            let probe = connect(&config).await?;
            let path = ops::delete_columns(&dir, &probe, table, columns).await?;
            created(&path);
        }
        Commands::CreateMigration { name } => {
            let path = ops::create_migration(&dir, name)?;
            created(&path);
        }
        Commands::Migrate => {
            let runner = runner(&config)?;
            let outcome = Migrator::new(&runner, &dir, config.drift).migrate_up()?;
            print!("{}", outcome.output);
            if outcome.reconciliations > 0 {
                println!(
                    "{} reconciled drift in {} pass(es)",
                    "⚠".yellow(),
                    outcome.reconciliations
                );
            }
            report_cleanup(&outcome.cleanup);
            println!("{} Migrations applied", "✓".green());
        }
        Commands::Rollback { count, cleanup } => {
            let runner = runner(&config)?;
            let outcome = Migrator::new(&runner, &dir, config.drift).rollback(*count as usize)?;
            print!("{}", outcome.output);
            println!("{} Rolled back {} migration(s)", "✓".green(), outcome.steps);
            finish_rollback(outcome, cleanup)?;
        }
        Commands::RollbackAll { cleanup } => {
            let runner = runner(&config)?;
            let outcome = Migrator::new(&runner, &dir, config.drift).rollback_all()?;
            print!("{}", outcome.output);
            println!("{} Rolled back all migrations", "✓".green());
            finish_rollback(outcome, cleanup)?;
        }
        Commands::Status { json } => {
            let runner = runner(&config)?;
            let report = Migrator::new(&runner, &dir, config.drift).status()?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.text);
                if !report.missing.is_empty() {
                    let missing: Vec<String> = report.missing.iter().map(|v| v.to_string()).collect();
                    println!(
                        "{} applied but missing locally: {}",
                        "⚠".yellow(),
                        missing.join(", ").yellow()
                    );
                }
            }
        }
        Commands::Generate => {
            let generator = SqlcGenerator::new(&config.generator.binary);
            let generated = ops::generate(&generator, &dir, &config.generator, &config.query_dir())?;
            if let Some(init) = &generated.init {
                created(&init.config);
            }
            print!("{}", generated.output.text);
            println!("{} Code generated", "✓".green());
        }
        Commands::GenerateInit { force } => {
            let init = ops::generate_init(&dir, &config.generator, &config.query_dir(), *force)?;
            created(&init.config);
            if let Some(example) = &init.example {
                created(example);
            }
            println!("{}", "Next: add queries, then run `migro generate`".dimmed());
        }
        Commands::ReadTable { table } => {
            let probe = connect(&config).await?;
            let columns = ops::read_table(&probe, table).await?;
            println!("{}", table.white().bold());
            for column in &columns {
                println!("  {}", column);
            }
            println!("{} column(s)", columns.len().to_string().cyan());
        }
        Commands::Cleanup => {
            let report = ops::cleanup(&dir)?;
            if report.removed.is_empty() && report.failed.is_empty() {
                println!("{}", "(no placeholders)".dimmed());
            }
            report_cleanup(&report);
        }
    }

    Ok(())
}

async fn connect(config: &MigroConfig) -> anyhow::Result<PgProbe> {
    Ok(PgProbe::connect(&config.connection_string()?).await?)
}

fn runner(config: &MigroConfig) -> anyhow::Result<GooseRunner> {
    Ok(GooseRunner::new(
        &config.runner.binary,
        &config.migration_dir,
        &config.database.driver,
        config.connection_string()?,
    ))
}

fn created(path: &Path) {
    println!("{} Created {}", "✓".green(), path.display().to_string().cyan());
}

fn report_cleanup(report: &CleanupReport) {
    for path in &report.removed {
        println!("{} Removed {}", "✓".green(), path.display());
    }
    for (path, error) in &report.failed {
        println!("{} Could not remove {}: {}", "⚠".yellow(), path.display(), error);
    }
}

fn finish_rollback(mut outcome: RollbackOutcome, choice: &CleanupChoice) -> anyhow::Result<()> {
    if outcome.session.is_empty() {
        return Ok(());
    }

    println!(
        "{} {} placeholder migration(s) were created:",
        "⚠".yellow(),
        outcome.session.pending().len()
    );
    for path in outcome.session.pending() {
        println!("  {}", path.display());
    }

    let remove = if choice.cleanup {
        true
    } else if choice.keep {
        false
    } else {
        confirm("Delete them now?")?
    };

    if remove {
        report_cleanup(&outcome.session.cleanup());
    } else {
        println!("{}", "Kept. Remove later with `migro cleanup`.".dimmed());
    }
    Ok(())
}

fn confirm(question: &str) -> anyhow::Result<bool> {
    print!("{} [y/N]: ", question);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
