use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;

use migro::config::DriftConfig;
use migro::drift::Reconciliation;
use migro::engine::{RunnerCommand, RunnerOutput};
use migro::ledger::DiagnosticScanner;
use migro::migration::MigrationBody;
use migro::prelude::*;
use migro::transpiler;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

/// A goose stand-in: a fixed ledger plus a queue of outputs for mutating commands.
struct FakeGoose {
    applied: RefCell<Vec<u64>>,
    queue: RefCell<VecDeque<RunnerOutput>>,
}

impl FakeGoose {
    fn new(applied: &[u64]) -> Self {
        Self {
            applied: RefCell::new(applied.to_vec()),
            queue: RefCell::new(VecDeque::new()),
        }
    }

    fn push(&self, success: bool, text: &str) {
        self.queue.borrow_mut().push_back(RunnerOutput {
            status: Some(if success { 0 } else { 1 }),
            success,
            text: text.to_string(),
        });
    }
}

impl MigrationRunner for FakeGoose {
    fn name(&self) -> &str {
        "goose"
    }

    fn run(&self, command: RunnerCommand) -> MigroResult<RunnerOutput> {
        match command {
            RunnerCommand::Status => {
                let mut text = String::from("    Applied At                  Migration\n    =======================================\n");
                for v in self.applied.borrow().iter() {
                    text.push_str(&format!("    Mon Jul  7 17:17:59 2025 -- {}_x.sql\n", v));
                }
                Ok(RunnerOutput {
                    status: Some(0),
                    success: true,
                    text,
                })
            }
            _ => self
                .queue
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| MigroError::tool("goose", None, "unexpected invocation")),
        }
    }
}

#[test]
fn test_generated_files_round_trip_through_directory() {
    let tmp = TempDir::new().unwrap();
    let dir = MigrationDir::new(tmp.path().join("db/migrations"));

    let columns = parse_columns("title:varchar(200):not_null,price:numeric(10,2):default=0").unwrap();
    let script = transpiler::create_table("products", &columns).unwrap();
    let path = dir.create(script, chrono::Utc::now()).unwrap();

    let content = fs::read_to_string(&path).unwrap();
    assert!(content.starts_with("-- +goose Up\n"));
    let body = MigrationBody::parse("products", &content).unwrap();
    assert_eq!(
        body.up,
        "CREATE TABLE IF NOT EXISTS products(\n    \
         product_id serial primary key,\n    \
         title VARCHAR(200) NOT NULL,\n    \
         price NUMERIC(10,2) DEFAULT 0,\n    \
         created_at timestamp DEFAULT CURRENT_TIMESTAMP,\n    \
         updated_at timestamp DEFAULT CURRENT_TIMESTAMP,\n    \
         deleted_at timestamp\n);"
    );
    assert_eq!(body.down, "DROP TABLE IF EXISTS products;");

    // Same logical change again is refused whatever the version.
    let again = transpiler::create_table("products", &columns).unwrap();
    assert!(matches!(dir.create(again, chrono::Utc::now()), Err(MigroError::Conflict(_))));
}

#[test]
fn test_versions_stay_monotonic() {
    let tmp = TempDir::new().unwrap();
    let dir = MigrationDir::new(tmp.path());
    let now = chrono::Utc::now();

    for name in ["one", "two", "three"] {
        dir.create(transpiler::empty_script(name).unwrap(), now).unwrap();
    }
    let versions: Vec<MigrationVersion> = dir.versions().unwrap().into_iter().collect();
    assert_eq!(versions.len(), 3);
    assert!(versions.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_drift_example_from_ledger() {
    let tmp = TempDir::new().unwrap();
    let dir = MigrationDir::new(tmp.path());
    fs::write(tmp.path().join("20250101000100_a.sql"), "-- +goose Up\nSELECT 1;\n").unwrap();
    fs::write(tmp.path().join("20250101000102_c.sql"), "-- +goose Up\nSELECT 1;\n").unwrap();
    let goose = FakeGoose::new(&[20250101000100, 20250101000101, 20250101000102]);

    let migrator = Migrator::new(&goose, &dir, DriftConfig::default());
    let status = migrator.status().unwrap();
    let missing: Vec<u64> = status.missing.iter().map(|v| v.value()).collect();
    assert_eq!(missing, vec![20250101000101]);

    let applied = status.applied.iter().copied().collect();
    let missing = status.missing.iter().copied().collect();
    assert_eq!(rollback_depth(&missing, &applied), 1);
}

#[test]
fn test_proactive_reconcile_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let dir = MigrationDir::new(tmp.path());
    let goose = FakeGoose::new(&[20250101000100, 20250101000101]);
    let scanner = DiagnosticScanner::new();
    let reconciler = Reconciler::new(&goose, &dir, &scanner);

    let mut session = ReconcileSession::new();
    let first = reconciler.reconcile_report(&mut session).unwrap();
    assert!(matches!(first, Reconciliation::Progress { ref created } if created.len() == 2));
    assert!(reconciler.reconcile_report(&mut session).is_err());

    assert_eq!(dir.placeholders().unwrap().len(), 2);
    assert_eq!(session.pending().len(), 2);
}

#[test]
fn test_migrate_then_rollback_with_drift() {
    let tmp = TempDir::new().unwrap();
    let dir = MigrationDir::new(tmp.path());
    fs::write(tmp.path().join("20250101000100_a.sql"), "-- +goose Up\nSELECT 1;\n").unwrap();
    let goose = FakeGoose::new(&[20250101000100, 20250101000101]);

    goose.push(
        false,
        "goose run: error: found 1 missing migrations before current version 20250101000102:\n\
         \tversion 20250101000101: db/migrations/20250101000101_add_bio.sql\n",
    );
    goose.push(true, "OK   20250101000102_c.sql (1.2ms)\n");

    let migrator = Migrator::new(&goose, &dir, DriftConfig::default());
    let outcome = migrator.migrate_up().unwrap();
    assert_eq!(outcome.reconciliations, 1);
    assert_eq!(outcome.cleanup.removed.len(), 1);
    assert!(dir.placeholders().unwrap().is_empty());

    goose.push(false, "goose run: migration 20250101000101: no current version found\n");
    goose.push(true, "OK   20250101000101_temp_migration.sql\n");

    let mut rollback = migrator.rollback(1).unwrap();
    assert_eq!(rollback.session.pending().len(), 1);
    let report = rollback.session.cleanup();
    assert_eq!(report.removed.len(), 1);
    assert!(dir.placeholders().unwrap().is_empty());
}

#[test]
fn test_rollback_retry_ceiling_surfaces_failure() {
    let tmp = TempDir::new().unwrap();
    let dir = MigrationDir::new(tmp.path());
    let goose = FakeGoose::new(&[]);
    let limits = DriftConfig {
        apply_retries: 3,
        rollback_retries: 2,
    };

    for v in [20250101000101u64, 20250101000102, 20250101000103] {
        goose.push(false, &format!("goose run: migration {}: no current version found", v));
    }

    let err = Migrator::new(&goose, &dir, limits).rollback(1).unwrap_err();
    assert!(matches!(err, MigroError::DriftUnresolvable { .. }));
    assert_eq!(dir.placeholders().unwrap().len(), 2);
}
