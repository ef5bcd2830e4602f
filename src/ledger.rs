//! Migration ledger interface.
//!
//! The runner's status and error text is the only loosely structured input
//! migro reads. All of its patterns live in [`DiagnosticScanner`].

use std::collections::BTreeSet;

use regex::Regex;

use crate::drift::DriftReport;
use crate::engine::{MigrationRunner, RunnerCommand};
use crate::error::MigroResult;
use crate::migration::{MigrationDir, MigrationVersion};

/// One migration line of the runner's status output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub version: MigrationVersion,
    pub slug: String,
    pub applied: bool,
}

/// A migration the runner reports as missing locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingMigration {
    pub version: MigrationVersion,
    /// Slug from the diagnostic, when it named one.
    pub slug: Option<String>,
}

/// Extracts versions from runner output.
pub struct DiagnosticScanner {
    status_line: Regex,
    missing_listed: Regex,
    missing_fallback: Regex,
    rollback_missing: Regex,
    rollback_failed: Regex,
    version_line: Regex,
}

impl DiagnosticScanner {
    pub fn new() -> Self {
        Self {
            // [<log prefix>] [<applied at> | Pending] -- <version>_<slug>.sql
            status_line: Regex::new(
                r"^\s*(?:(?P<prefix>.*?)\s+--\s+)?(?P<version>\d{14})_(?P<slug>[^\s/]+)\.sql\s*$",
            )
            .unwrap(),
            // version 20250702043810: db/migrations/20250702043810_add_x.sql
            missing_listed: Regex::new(r"version\s+(\d{14}):\s+\S*?(\d{14})_([^./\s]+)\.sql")
                .unwrap(),
            // missing migration: 20240101123456[_slug]
            missing_fallback: Regex::new(r"missing migrations?:?\s*(\d{14})(?:_([^,\s]+))?")
                .unwrap(),
            rollback_missing: Regex::new(r"migration\s+(\d{14}):\s+no current version").unwrap(),
            rollback_failed: Regex::new(r"goose run: migration\s+(\d{14}):").unwrap(),
            version_line: Regex::new(r"version\s+(\d{14})").unwrap(),
        }
    }

    /// Every migration line of a status report, in output order.
    pub fn status_entries(&self, text: &str) -> Vec<StatusEntry> {
        text.lines()
            .filter_map(|line| {
                let caps = self.status_line.captures(line)?;
                let version = caps["version"].parse().ok()?;
                let pending = caps
                    .name("prefix")
                    .and_then(|p| p.as_str().split_whitespace().last())
                    .is_some_and(|word| word.eq_ignore_ascii_case("pending"));
                Some(StatusEntry {
                    version,
                    slug: caps["slug"].to_string(),
                    applied: !pending,
                })
            })
            .collect()
    }

    /// The applied-version set of a status report.
    pub fn applied_versions(&self, text: &str) -> BTreeSet<MigrationVersion> {
        self.status_entries(text)
            .into_iter()
            .filter(|e| e.applied)
            .map(|e| e.version)
            .collect()
    }

    /// Forward apply refused because history has a hole.
    pub fn is_forward_drift(&self, text: &str) -> bool {
        text.contains("missing migration") && text.contains("before current version")
    }

    /// Single-step rollback found no file for the current version.
    pub fn is_rollback_drift(&self, text: &str) -> bool {
        text.contains("no current version found")
    }

    /// Full reset blocked by missing files.
    pub fn is_reset_drift(&self, text: &str) -> bool {
        text.contains("missing") && text.contains("migration")
    }

    /// Missing migrations named by an apply error, deduplicated, in order.
    ///
    /// Listed `version N: path/N_slug.sql` lines win; otherwise a bare
    /// `missing migration: N` is accepted.
    pub fn missing_migrations(&self, text: &str) -> Vec<MissingMigration> {
        let mut found: Vec<MissingMigration> = Vec::new();
        for caps in self.missing_listed.captures_iter(text) {
            let Ok(version) = caps[2].parse::<MigrationVersion>() else {
                continue;
            };
            if caps[1] != caps[2] || found.iter().any(|m| m.version == version) {
                continue;
            }
            found.push(MissingMigration {
                version,
                slug: Some(caps[3].to_string()),
            });
        }
        if !found.is_empty() {
            return found;
        }

        self.missing_fallback
            .captures(text)
            .and_then(|caps| {
                let version = caps[1].parse().ok()?;
                Some(MissingMigration {
                    version,
                    slug: caps.get(2).map(|m| m.as_str().to_string()),
                })
            })
            .into_iter()
            .collect()
    }

    /// Version a failed rollback step was trying to undo.
    pub fn rollback_version(&self, text: &str) -> Option<MigrationVersion> {
        self.rollback_missing
            .captures(text)
            .or_else(|| self.rollback_failed.captures(text))
            .and_then(|caps| caps[1].parse().ok())
    }

    /// Current version from `goose version` output.
    pub fn current_version(&self, text: &str) -> Option<MigrationVersion> {
        self.version_line
            .captures(text)
            .and_then(|caps| caps[1].parse().ok())
    }
}

impl Default for DiagnosticScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Both sides of the history: the runner's ledger and the local files.
pub struct Ledger<'a, R: MigrationRunner> {
    runner: &'a R,
    dir: &'a MigrationDir,
    scanner: &'a DiagnosticScanner,
}

impl<'a, R: MigrationRunner> Ledger<'a, R> {
    pub fn new(runner: &'a R, dir: &'a MigrationDir, scanner: &'a DiagnosticScanner) -> Self {
        Self {
            runner,
            dir,
            scanner,
        }
    }

    pub fn local_versions(&self) -> MigroResult<BTreeSet<MigrationVersion>> {
        self.dir.versions()
    }

    /// Raw status report from the runner.
    pub fn status_text(&self) -> MigroResult<String> {
        let output = self.runner.run(RunnerCommand::Status)?;
        if !output.success {
            return Err(output.into_error(self.runner.name()));
        }
        Ok(output.text)
    }

    pub fn applied_versions(&self) -> MigroResult<BTreeSet<MigrationVersion>> {
        Ok(self.scanner.applied_versions(&self.status_text()?))
    }

    /// Current version according to the runner, if it reports one.
    pub fn current_version(&self) -> MigroResult<Option<MigrationVersion>> {
        let output = self.runner.run(RunnerCommand::Version)?;
        Ok(self.scanner.current_version(&output.text))
    }

    /// Applied versions with no local file.
    pub fn drift_report(&self) -> MigroResult<DriftReport> {
        let applied = self.applied_versions()?;
        let local = self.local_versions()?;
        Ok(DriftReport::between(&applied, &local))
    }
}
