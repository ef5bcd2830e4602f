//! Drift reconciliation.
//!
//! When the runner's ledger names versions that have no local file, the
//! runner refuses to move. Reconciliation writes no-op placeholder files for
//! those versions so it can proceed, or, when a real file already holds the
//! version, recommends how many migrations to roll back instead.

use std::collections::BTreeSet;
use std::fs;
use std::ops::Bound::{Excluded, Unbounded};
use std::path::PathBuf;

use crate::engine::MigrationRunner;
use crate::error::{MigroError, MigroResult};
use crate::ledger::{DiagnosticScanner, Ledger, MissingMigration};
use crate::migration::{
    LocalMigration, MigrationBody, MigrationDir, MigrationFile, MigrationVersion,
    PLACEHOLDER_PREFIX,
};

const PLACEHOLDER_STATEMENT: &str = "SELECT 1;";

/// Versions the ledger holds that no local file carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriftReport {
    pub missing: BTreeSet<MigrationVersion>,
}

impl DriftReport {
    pub fn between(
        applied: &BTreeSet<MigrationVersion>,
        local: &BTreeSet<MigrationVersion>,
    ) -> Self {
        Self {
            missing: applied.difference(local).copied().collect(),
        }
    }

    pub fn earliest_missing(&self) -> Option<MigrationVersion> {
        self.missing.first().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.missing.is_empty()
    }
}

/// How many of the most recent applied migrations must be undone before
/// history is contiguous again: the applied versions newer than the
/// earliest missing one.
pub fn rollback_depth(
    missing: &BTreeSet<MigrationVersion>,
    applied: &BTreeSet<MigrationVersion>,
) -> usize {
    match missing.first() {
        Some(earliest) => applied.range((Excluded(*earliest), Unbounded)).count(),
        None => 0,
    }
}

/// Slug for the placeholder standing in for `slug`.
pub fn placeholder_slug(slug: Option<&str>) -> String {
    match slug {
        Some(s) if s.starts_with(PLACEHOLDER_PREFIX) => s.to_string(),
        Some(s) if !s.is_empty() => format!("{}{}", PLACEHOLDER_PREFIX, s),
        _ => format!("{}migration", PLACEHOLDER_PREFIX),
    }
}

/// A no-op migration for `version`.
pub fn placeholder_file(version: MigrationVersion, slug: Option<&str>) -> MigrationFile {
    let slug = placeholder_slug(slug);
    let up = format!(
        "-- Placeholder created by migro for a migration missing locally\n\
         -- Version: {}\n\
         -- Name: {}\n\
         -- Safe to delete once the runner no longer needs this version\n\
         {}",
        version, slug, PLACEHOLDER_STATEMENT
    );
    MigrationFile {
        version,
        slug,
        body: MigrationBody {
            up,
            down: PLACEHOLDER_STATEMENT.to_string(),
        },
    }
}

/// Whether a body does nothing beyond the placeholder statement.
pub fn is_noop_body(body: &MigrationBody) -> bool {
    let noop = |section: &str| {
        section
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with("--"))
            .all(|l| l == PLACEHOLDER_STATEMENT)
    };
    noop(&body.up) && noop(&body.down)
}

/// Placeholders written during one operation.
///
/// Owned by the operation and handed back to the caller, which decides
/// whether to clean up.
#[derive(Debug, Default)]
pub struct ReconcileSession {
    pending: Vec<PathBuf>,
}

/// Result of a best-effort cleanup.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl ReconcileSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> &[PathBuf] {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn track(&mut self, path: PathBuf) {
        self.pending.push(path);
    }

    /// Delete this session's placeholders. Failures are logged and reported,
    /// never raised.
    pub fn cleanup(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();
        for path in self.pending.drain(..) {
            remove_logged(path, &mut report);
        }
        report
    }
}

fn remove_logged(path: PathBuf, report: &mut CleanupReport) {
    match fs::remove_file(&path) {
        Ok(()) => {
            tracing::info!(path = %path.display(), "removed placeholder");
            report.removed.push(path);
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not remove placeholder");
            report.failed.push((path, e.to_string()));
        }
    }
}

/// Delete every placeholder in the directory whose body is still a no-op.
pub fn cleanup_placeholders(dir: &MigrationDir) -> MigroResult<CleanupReport> {
    let mut report = CleanupReport::default();
    for entry in dir.placeholders()? {
        match entry.read_body() {
            Ok(body) if is_noop_body(&body) => remove_logged(entry.path, &mut report),
            Ok(_) => {
                tracing::warn!(path = %entry.path.display(), "placeholder slug with real statements, keeping");
            }
            Err(e) => {
                tracing::warn!(path = %entry.path.display(), error = %e, "unreadable placeholder, keeping");
                report.failed.push((entry.path, e.to_string()));
            }
        }
    }
    Ok(report)
}

/// A local file that only stands in for a missing migration: placeholder
/// slug and a body that still does nothing. Unreadable files count as real.
fn is_stand_in(entry: &LocalMigration) -> bool {
    entry.is_placeholder()
        && entry
            .read_body()
            .map(|body| is_noop_body(&body))
            .unwrap_or(false)
}

/// What a reconciliation pass decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// New placeholders were written; the runner can be retried.
    Progress { created: Vec<PathBuf> },
    /// Real files already hold the versions; undo `depth` migrations instead.
    RecommendRollback {
        depth: usize,
        blocking: Vec<MigrationVersion>,
    },
    /// Neither the runner's text nor the ledger names a missing version, so
    /// the failure is not drift.
    NothingMissing,
}

/// Sole writer of placeholder migrations.
pub struct Reconciler<'a, R: MigrationRunner> {
    dir: &'a MigrationDir,
    scanner: &'a DiagnosticScanner,
    ledger: Ledger<'a, R>,
}

impl<'a, R: MigrationRunner> Reconciler<'a, R> {
    pub fn new(runner: &'a R, dir: &'a MigrationDir, scanner: &'a DiagnosticScanner) -> Self {
        Self {
            dir,
            scanner,
            ledger: Ledger::new(runner, dir, scanner),
        }
    }

    /// Reconcile after a forward apply failed with `error_text`.
    pub fn reconcile_apply(
        &self,
        session: &mut ReconcileSession,
        error_text: &str,
    ) -> MigroResult<Reconciliation> {
        let mut missing = self.scanner.missing_migrations(error_text);
        if missing.is_empty() {
            tracing::debug!("apply error names no version, falling back to drift report");
            missing = self.report_missing()?;
        }
        self.reconcile(session, missing)
    }

    /// Reconcile after a single rollback step failed with `error_text`.
    pub fn reconcile_rollback(
        &self,
        session: &mut ReconcileSession,
        error_text: &str,
    ) -> MigroResult<Reconciliation> {
        let version = match self.scanner.rollback_version(error_text) {
            Some(version) => Some(version),
            None => {
                tracing::debug!("rollback error names no version, asking runner");
                self.ledger.current_version()?
            }
        };
        let missing = match version {
            Some(version) => vec![MissingMigration {
                version,
                slug: None,
            }],
            None => self.report_missing()?,
        };
        self.reconcile(session, missing)
    }

    /// Reconcile proactively from the ledger/local difference.
    pub fn reconcile_report(&self, session: &mut ReconcileSession) -> MigroResult<Reconciliation> {
        let missing = self.report_missing()?;
        self.reconcile(session, missing)
    }

    fn report_missing(&self) -> MigroResult<Vec<MissingMigration>> {
        let report = self.ledger.drift_report()?;
        Ok(report
            .missing
            .into_iter()
            .map(|version| MissingMigration {
                version,
                slug: None,
            })
            .collect())
    }

    fn reconcile(
        &self,
        session: &mut ReconcileSession,
        missing: Vec<MissingMigration>,
    ) -> MigroResult<Reconciliation> {
        if missing.is_empty() {
            tracing::debug!("no missing version identified");
            return Ok(Reconciliation::NothingMissing);
        }

        let local = self.dir.entries()?;
        let on_disk = |version: MigrationVersion| local.iter().filter(move |e| e.version == version);

        let blocking: Vec<MigrationVersion> = missing
            .iter()
            .filter(|m| on_disk(m.version).any(|e| !is_stand_in(e)))
            .map(|m| m.version)
            .collect();

        if !blocking.is_empty() {
            let applied = self.ledger.applied_versions()?;
            let versions: BTreeSet<MigrationVersion> = missing.iter().map(|m| m.version).collect();
            let depth = rollback_depth(&versions, &applied);
            tracing::warn!(?blocking, depth, "real migration files block placeholder creation");
            return Ok(Reconciliation::RecommendRollback { depth, blocking });
        }

        let mut created = Vec::new();
        for m in &missing {
            if let Some(existing) = on_disk(m.version).next() {
                tracing::debug!(path = %existing.path.display(), "reusing placeholder");
                continue;
            }
            let path = self
                .dir
                .write(&placeholder_file(m.version, m.slug.as_deref()))?;
            tracing::info!(version = %m.version, path = %path.display(), "created placeholder");
            session.track(path.clone());
            created.push(path);
        }

        if created.is_empty() {
            return Err(MigroError::drift(
                "every needed placeholder already exists; the runner still refuses",
                None,
            ));
        }
        Ok(Reconciliation::Progress { created })
    }
}
