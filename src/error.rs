//! Error types for migro.

use thiserror::Error;

/// The main error type for migro operations.
///
/// Every variant is raised before the operation mutates anything it could not
/// finish, except [`MigroError::ExternalTool`], which reports whatever the
/// external runner left behind.
#[derive(Debug, Error)]
pub enum MigroError {
    /// Bad column spec, unknown type, or a table/column that is not there.
    /// Nothing has been written.
    #[error("Invalid '{subject}': {message}")]
    Validation { subject: String, message: String },

    /// A migration for the same logical change already exists.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The migration runner or code generator failed.
    #[error("{tool} failed ({}):\n{output}", exit_label(.status))]
    ExternalTool {
        tool: String,
        status: Option<i32>,
        output: String,
    },

    /// Drift reconciliation made no progress or refused to guess.
    #[error("Drift unresolvable: {reason}{}", rollback_hint(.rollback_depth))]
    DriftUnresolvable {
        reason: String,
        rollback_depth: Option<usize>,
    },

    /// A table/column existence or definition lookup failed.
    #[error("Store probe failed: {0}")]
    StoreProbe(String),

    /// Could not reach the relational store.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A migration file does not follow the up/down marker layout.
    #[error("Malformed migration {file}: {message}")]
    Parse { file: String, message: String },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit status {}", code),
        None => "no exit status".to_string(),
    }
}

fn rollback_hint(depth: &Option<usize>) -> String {
    match depth {
        Some(n) => format!(" (roll back {} migration(s): `migro rollback {}`)", n, n),
        None => String::new(),
    }
}

impl MigroError {
    /// Create a validation error about a column or table.
    pub fn validation(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            subject: subject.into(),
            message: message.into(),
        }
    }

    /// Create an external tool error from captured output.
    pub fn tool(tool: impl Into<String>, status: Option<i32>, output: impl Into<String>) -> Self {
        Self::ExternalTool {
            tool: tool.into(),
            status,
            output: output.into(),
        }
    }

    /// Create a drift error, optionally carrying a rollback recommendation.
    pub fn drift(reason: impl Into<String>, rollback_depth: Option<usize>) -> Self {
        Self::DriftUnresolvable {
            reason: reason.into(),
            rollback_depth,
        }
    }

    /// The rollback the operator should run, if this error recommends one.
    pub fn recommended_rollback(&self) -> Option<usize> {
        match self {
            Self::DriftUnresolvable { rollback_depth, .. } => *rollback_depth,
            _ => None,
        }
    }
}

impl From<sqlx::Error> for MigroError {
    fn from(err: sqlx::Error) -> Self {
        Self::StoreProbe(err.to_string())
    }
}

/// Result type alias for migro operations.
pub type MigroResult<T> = Result<T, MigroError>;
