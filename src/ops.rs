//! Operations behind each CLI command.
//!
//! File-generating operations validate everything (spec, table, columns,
//! slug) before the single write. Runner operations drive the external
//! runner and reconcile drift within the configured retry ceilings.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use crate::config::{DriftConfig, GeneratorConfig};
use crate::drift::{self, CleanupReport, DriftReport, ReconcileSession, Reconciler, Reconciliation};
use crate::engine::{CodeGenerator, MigrationRunner, RunnerCommand, RunnerOutput, SqlcGenerator};
use crate::error::{MigroError, MigroResult};
use crate::ledger::{DiagnosticScanner, Ledger};
use crate::migration::{MigrationDir, MigrationVersion};
use crate::parser::{parse_column_names, parse_columns, validate_identifier};
use crate::schema::SchemaProbe;
use crate::transpiler::{self, MigrationScript};

async fn require_table<P: SchemaProbe>(probe: &P, table: &str) -> MigroResult<()> {
    validate_identifier(table, "table")?;
    if !probe.table_exists(table).await? {
        return Err(MigroError::validation(table, "table does not exist"));
    }
    Ok(())
}

fn write_script(dir: &MigrationDir, script: MigrationScript) -> MigroResult<PathBuf> {
    let path = dir.create(script, Utc::now())?;
    tracing::info!(path = %path.display(), "created migration");
    Ok(path)
}

/// Generate a create-table migration.
pub async fn create_table<P: SchemaProbe>(
    dir: &MigrationDir,
    probe: &P,
    table: &str,
    columns: &str,
) -> MigroResult<PathBuf> {
    let columns = parse_columns(columns)?;
    let script = transpiler::create_table(table, &columns)?;
    if probe.table_exists(table).await? {
        return Err(MigroError::Conflict(format!("table '{}' already exists", table)));
    }
    write_script(dir, script)
}

/// Generate an add-columns migration for an existing table.
pub async fn add_columns<P: SchemaProbe>(
    dir: &MigrationDir,
    probe: &P,
    table: &str,
    columns: &str,
) -> MigroResult<PathBuf> {
    let columns = parse_columns(columns)?;
    require_table(probe, table).await?;
    for col in &columns {
        if probe.column_exists(table, &col.name).await? {
            return Err(MigroError::Conflict(format!(
                "column '{}' already exists in table '{}'",
                col.name, table
            )));
        }
    }
    write_script(dir, transpiler::add_columns(table, &columns)?)
}

/// Generate a delete-columns migration whose down section recreates the
/// columns from their current definitions.
pub async fn delete_columns<P: SchemaProbe>(
    dir: &MigrationDir,
    probe: &P,
    table: &str,
    columns: &str,
) -> MigroResult<PathBuf> {
    let names = parse_column_names(columns)?;
    require_table(probe, table).await?;

    let mut definitions = Vec::with_capacity(names.len());
    for name in &names {
        let definition = probe.column_definition(table, name).await?.ok_or_else(|| {
            MigroError::validation(name, format!("column does not exist in table '{}'", table))
        })?;
        definitions.push(definition);
    }
    write_script(dir, transpiler::delete_columns(table, &definitions)?)
}

/// Write an empty, commented migration template.
pub fn create_migration(dir: &MigrationDir, name: &str) -> MigroResult<PathBuf> {
    write_script(dir, transpiler::empty_script(name)?)
}

/// Column names of an existing table.
pub async fn read_table<P: SchemaProbe>(probe: &P, table: &str) -> MigroResult<Vec<String>> {
    require_table(probe, table).await?;
    probe.list_columns(table).await
}

/// Delete every no-op placeholder in the directory.
pub fn cleanup(dir: &MigrationDir) -> MigroResult<CleanupReport> {
    drift::cleanup_placeholders(dir)
}

/// Files written by [`generate_init`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorInit {
    pub config: PathBuf,
    /// Example query file, when one was written.
    pub example: Option<PathBuf>,
}

/// Write the code generator configuration and an example query file.
///
/// An existing configuration is only replaced with `force`.
pub fn generate_init(
    dir: &MigrationDir,
    generator: &GeneratorConfig,
    query_dir: &Path,
    force: bool,
) -> MigroResult<GeneratorInit> {
    let config = dir.path().join(&generator.config_file);
    if config.exists() && !force {
        return Err(MigroError::Conflict(format!(
            "{} already exists (use --force to overwrite)",
            config.display()
        )));
    }

    fs::create_dir_all(dir.path())?;
    fs::create_dir_all(query_dir)?;

    let queries = pathdiff(query_dir, dir.path());
    fs::write(&config, SqlcGenerator::default_config(&queries))?;
    tracing::info!(path = %config.display(), "wrote generator config");

    let example = query_dir.join("example.sql");
    let example = if example.exists() {
        None
    } else {
        fs::write(&example, SqlcGenerator::example_queries())?;
        Some(example)
    };

    Ok(GeneratorInit { config, example })
}

/// `path` relative to `base` when it lies underneath it, else as given.
fn pathdiff(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

/// Result of [`generate`].
#[derive(Debug)]
pub struct Generated {
    /// Set when the generator config had to be created first.
    pub init: Option<GeneratorInit>,
    pub output: RunnerOutput,
}

/// Run the code generator in the migration directory.
pub fn generate<G: CodeGenerator>(
    generator: &G,
    dir: &MigrationDir,
    config: &GeneratorConfig,
    query_dir: &Path,
) -> MigroResult<Generated> {
    let init = if dir.path().join(&config.config_file).exists() {
        None
    } else {
        Some(generate_init(dir, config, query_dir, false)?)
    };
    let output = generator.generate(dir.path(), &config.config_file)?;
    Ok(Generated { init, output })
}

/// Outcome of a successful [`Migrator::migrate_up`].
#[derive(Debug)]
pub struct MigrateOutcome {
    pub output: String,
    /// Reconciliation passes it took.
    pub reconciliations: usize,
    pub cleanup: CleanupReport,
}

/// Outcome of a successful rollback; the session holds any placeholders
/// written along the way, for the caller to keep or clean up.
#[derive(Debug)]
pub struct RollbackOutcome {
    pub steps: usize,
    pub output: String,
    pub session: ReconcileSession,
}

/// Ledger and local files side by side.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    #[serde(skip)]
    pub text: String,
    pub applied: Vec<MigrationVersion>,
    pub local: Vec<MigrationVersion>,
    pub missing: Vec<MigrationVersion>,
}

/// Runner-backed operations.
pub struct Migrator<'a, R: MigrationRunner> {
    runner: &'a R,
    dir: &'a MigrationDir,
    scanner: DiagnosticScanner,
    limits: DriftConfig,
}

impl<'a, R: MigrationRunner> Migrator<'a, R> {
    pub fn new(runner: &'a R, dir: &'a MigrationDir, limits: DriftConfig) -> Self {
        Self {
            runner,
            dir,
            scanner: DiagnosticScanner::new(),
            limits,
        }
    }

    fn reconciler(&self) -> Reconciler<'_, R> {
        Reconciler::new(self.runner, self.dir, &self.scanner)
    }

    fn ledger(&self) -> Ledger<'_, R> {
        Ledger::new(self.runner, self.dir, &self.scanner)
    }

    /// Apply every pending migration, reconciling forward drift.
    ///
    /// Placeholders written on the way are removed once the apply succeeds.
    pub fn migrate_up(&self) -> MigroResult<MigrateOutcome> {
        let mut session = ReconcileSession::new();
        let result = self.drive_up(&mut session);
        let (output, reconciliations) = result.map_err(|e| self.abandon(&session, e))?;

        Ok(MigrateOutcome {
            output,
            reconciliations,
            cleanup: session.cleanup(),
        })
    }

    fn drive_up(&self, session: &mut ReconcileSession) -> MigroResult<(String, usize)> {
        let mut reconciliations = 0;
        loop {
            let output = self.runner.run(RunnerCommand::Up)?;
            if output.success {
                return Ok((output.text, reconciliations));
            }
            if !self.scanner.is_forward_drift(&output.text) {
                return Err(output.into_error(self.runner.name()));
            }
            if reconciliations >= self.limits.apply_retries {
                return Err(exhausted("apply", reconciliations));
            }

            reconciliations += 1;
            tracing::warn!(attempt = reconciliations, "migration history drift detected");
            let outcome = self.reconciler().reconcile_apply(session, &output.text)?;
            self.check_progress(outcome, output)?;
        }
    }

    /// Roll back `count` migrations, one step at a time.
    pub fn rollback(&self, count: usize) -> MigroResult<RollbackOutcome> {
        if count == 0 {
            return Err(MigroError::validation("count", "must roll back at least one migration"));
        }

        let mut session = ReconcileSession::new();
        let result = self.drive_down(count, &mut session);
        let outputs = result.map_err(|e| self.abandon(&session, e))?;

        Ok(RollbackOutcome {
            steps: count,
            output: outputs.concat(),
            session,
        })
    }

    fn drive_down(&self, count: usize, session: &mut ReconcileSession) -> MigroResult<Vec<String>> {
        let mut outputs = Vec::with_capacity(count);
        for step in 1..=count {
            let mut reconciliations = 0;
            loop {
                let output = self.runner.run(RunnerCommand::Down)?;
                if output.success {
                    tracing::debug!(step, "rolled back one migration");
                    outputs.push(output.text);
                    break;
                }
                if !self.scanner.is_rollback_drift(&output.text) {
                    return Err(output.into_error(self.runner.name()));
                }
                if reconciliations >= self.limits.rollback_retries {
                    return Err(exhausted("rollback", reconciliations));
                }

                reconciliations += 1;
                tracing::warn!(step, attempt = reconciliations, "rollback hit a missing migration");
                let outcome = self.reconciler().reconcile_rollback(session, &output.text)?;
                self.check_progress(outcome, output)?;
            }
        }
        Ok(outputs)
    }

    /// Roll back every migration.
    pub fn rollback_all(&self) -> MigroResult<RollbackOutcome> {
        let mut session = ReconcileSession::new();
        let result = self.drive_reset(&mut session);
        let output = result.map_err(|e| self.abandon(&session, e))?;

        Ok(RollbackOutcome {
            steps: 0,
            output,
            session,
        })
    }

    fn drive_reset(&self, session: &mut ReconcileSession) -> MigroResult<String> {
        let mut reconciliations = 0;
        loop {
            let output = self.runner.run(RunnerCommand::Reset)?;
            if output.success {
                return Ok(output.text);
            }
            if !self.scanner.is_reset_drift(&output.text) {
                return Err(output.into_error(self.runner.name()));
            }
            if reconciliations >= self.limits.rollback_retries {
                return Err(exhausted("reset", reconciliations));
            }

            reconciliations += 1;
            tracing::warn!(attempt = reconciliations, "reset hit missing migrations");
            let outcome = self.reconciler().reconcile_apply(session, &output.text)?;
            self.check_progress(outcome, output)?;
        }
    }

    /// Compare the runner's ledger with the local files.
    pub fn status(&self) -> MigroResult<StatusReport> {
        let ledger = self.ledger();
        let text = ledger.status_text()?;
        let applied = self.scanner.applied_versions(&text);
        let local = ledger.local_versions()?;
        let report = DriftReport::between(&applied, &local);

        Ok(StatusReport {
            text,
            applied: applied.into_iter().collect(),
            local: local.into_iter().collect(),
            missing: report.missing.into_iter().collect(),
        })
    }

    /// Continue after a reconciliation pass, or turn it into the error the
    /// caller sees. A failure that names no missing version is the runner's
    /// own error and keeps its output.
    fn check_progress(&self, outcome: Reconciliation, output: RunnerOutput) -> MigroResult<()> {
        match outcome {
            Reconciliation::Progress { created } => {
                tracing::info!(count = created.len(), "placeholders created, retrying");
                Ok(())
            }
            Reconciliation::RecommendRollback { depth, blocking } => {
                let versions: Vec<String> = blocking.iter().map(|v| v.to_string()).collect();
                Err(MigroError::drift(
                    format!(
                        "local migration files exist for {} but the runner skipped them",
                        versions.join(", ")
                    ),
                    Some(depth),
                ))
            }
            Reconciliation::NothingMissing => Err(output.into_error(self.runner.name())),
        }
    }

    /// Log placeholders a failed operation leaves behind, then hand back the error.
    fn abandon(&self, session: &ReconcileSession, error: MigroError) -> MigroError {
        if !session.is_empty() {
            tracing::warn!(
                placeholders = ?session.pending(),
                "leaving placeholders in place; run `migro cleanup` once resolved"
            );
        }
        error
    }
}

fn exhausted(what: &str, attempts: usize) -> MigroError {
    MigroError::drift(
        format!("{} still drifting after {} reconciliation(s)", what, attempts),
        None,
    )
}
