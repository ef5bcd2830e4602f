//! External tool execution.
//!
//! Runs the migration runner (goose) and the query code generator (sqlc) as
//! blocking child processes. Output is captured in full before anything
//! parses it.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::error::{MigroError, MigroResult};

/// Commands understood by the migration runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerCommand {
    /// Apply every pending migration.
    Up,
    /// Roll back one migration.
    Down,
    Status,
    /// Roll back every migration.
    Reset,
    Version,
}

impl RunnerCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Status => "status",
            Self::Reset => "reset",
            Self::Version => "version",
        }
    }
}

/// Captured result of one runner invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerOutput {
    /// Exit code; `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub success: bool,
    /// Stdout followed by stderr.
    pub text: String,
}

impl RunnerOutput {
    fn from_process(output: Output) -> Self {
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Self {
            status: output.status.code(),
            success: output.status.success(),
            text,
        }
    }

    /// Turn a failed run into an [`MigroError::ExternalTool`].
    pub fn into_error(self, tool: &str) -> MigroError {
        MigroError::tool(tool, self.status, self.text)
    }
}

/// An external versioned-migration runner.
pub trait MigrationRunner {
    /// Name shown in errors.
    fn name(&self) -> &str;

    /// Run one command to completion. A non-zero exit is not an error here;
    /// callers inspect [`RunnerOutput::success`] and the text.
    fn run(&self, command: RunnerCommand) -> MigroResult<RunnerOutput>;
}

/// The goose migration runner.
#[derive(Debug, Clone)]
pub struct GooseRunner {
    binary: String,
    dir: PathBuf,
    driver: String,
    dsn: String,
}

impl GooseRunner {
    pub fn new(
        binary: impl Into<String>,
        dir: impl Into<PathBuf>,
        driver: impl Into<String>,
        dsn: impl Into<String>,
    ) -> Self {
        Self {
            binary: binary.into(),
            dir: dir.into(),
            driver: driver.into(),
            dsn: dsn.into(),
        }
    }
}

impl MigrationRunner for GooseRunner {
    fn name(&self) -> &str {
        &self.binary
    }

    fn run(&self, command: RunnerCommand) -> MigroResult<RunnerOutput> {
        tracing::debug!(
            runner = %self.binary,
            command = command.as_str(),
            dir = %self.dir.display(),
            "invoking migration runner"
        );

        let output = Command::new(&self.binary)
            .arg("-dir")
            .arg(&self.dir)
            .arg(&self.driver)
            .arg(&self.dsn)
            .arg(command.as_str())
            .output()
            .map_err(|e| spawn_error(&self.binary, e, GOOSE_INSTALL_HINT))?;

        let output = RunnerOutput::from_process(output);
        tracing::debug!(
            command = command.as_str(),
            status = ?output.status,
            "migration runner finished"
        );
        Ok(output)
    }
}

const GOOSE_INSTALL_HINT: &str = "install it with: go install github.com/pressly/goose/v3/cmd/goose@latest";

const SQLC_INSTALL_HINT: &str = "install it with: go install github.com/sqlc-dev/sqlc/cmd/sqlc@latest \
(or brew install sqlc, see https://docs.sqlc.dev/en/latest/overview/install.html)";

fn spawn_error(binary: &str, err: io::Error, hint: &str) -> MigroError {
    let output = if err.kind() == io::ErrorKind::NotFound {
        format!("command not found; {}", hint)
    } else {
        err.to_string()
    };
    MigroError::tool(binary, None, output)
}

/// An external query code generator.
pub trait CodeGenerator {
    /// Run generation inside `workdir` against `config_file`. Only success
    /// matters; a failed run is an [`MigroError::ExternalTool`].
    fn generate(&self, workdir: &Path, config_file: &str) -> MigroResult<RunnerOutput>;
}

/// The sqlc code generator.
#[derive(Debug, Clone)]
pub struct SqlcGenerator {
    binary: String,
}

impl SqlcGenerator {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Default sqlc configuration: PostgreSQL engine, schema from the
    /// migration directory, queries from `queries` (relative to it).
    pub fn default_config(queries: &str) -> String {
        format!(
            r#"version: "2"
sql:
  - engine: "postgresql"
    queries: "{queries}"
    schema: "."
    gen:
      go:
        package: "db"
        out: "../internal/db"
        sql_package: "pgx/v5"
        emit_json_tags: true
        emit_prepared_queries: false
        emit_interface: true
        emit_empty_slices: true
        emit_all_enum_values: true
        overrides:
          - db_type: "timestamptz"
            go_type: "time.Time"
          - db_type: "uuid"
            go_type: "github.com/google/uuid.UUID"
"#
        )
    }

    /// Example query file written next to a fresh configuration.
    pub fn example_queries() -> &'static str {
        "-- Example query file
-- name: GetUser :one
SELECT * FROM users WHERE user_id = $1 AND deleted_at IS NULL;

-- name: ListUsers :many
SELECT * FROM users WHERE deleted_at IS NULL ORDER BY created_at DESC LIMIT $1;

-- name: CreateUser :one
INSERT INTO users (name, email) VALUES ($1, $2) RETURNING *;
"
    }
}

impl Default for SqlcGenerator {
    fn default() -> Self {
        Self::new("sqlc")
    }
}

impl CodeGenerator for SqlcGenerator {
    fn generate(&self, workdir: &Path, config_file: &str) -> MigroResult<RunnerOutput> {
        tracing::debug!(generator = %self.binary, workdir = %workdir.display(), "invoking code generator");

        let output = Command::new(&self.binary)
            .args(["generate", "-f", config_file])
            .current_dir(workdir)
            .output()
            .map_err(|e| spawn_error(&self.binary, e, SQLC_INSTALL_HINT))?;

        let output = RunnerOutput::from_process(output);
        if !output.success {
            return Err(output.into_error(&self.binary));
        }
        Ok(output)
    }
}
