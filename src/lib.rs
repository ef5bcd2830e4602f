//! # migro — migrations without the typing
//!
//! migro turns compact column specs into idempotent, reversible migration
//! files for goose, and keeps goose moving when its applied-version ledger
//! and the local migration directory disagree.
//!
//! ## Quick Example
//!
//! ```rust
//! use migro::prelude::*;
//!
//! // Compile a column spec
//! let fragments = migro::compile("email:string:not_null:unique,tags:text:array").unwrap();
//! assert_eq!(fragments[0], "email VARCHAR NOT NULL UNIQUE");
//! assert_eq!(fragments[1], "tags TEXT[] DEFAULT ARRAY[]::TEXT[]");
//!
//! // Build a full migration
//! let columns = parse_columns("email:string:not_null").unwrap();
//! let script = migro::transpiler::create_table("users", &columns).unwrap();
//! assert_eq!(script.slug, "create_users");
//! ```
//!
//! ## Column Specs
//!
//! | Part          | Example                  | Meaning                         |
//! |---------------|--------------------------|---------------------------------|
//! | `name:type`   | `age:int`                | Column and type token           |
//! | `array`       | `tags:text:array`        | Array of the type               |
//! | `default=`    | `n:int:default=0`        | Default expression              |
//! | `not_null`    | `email:string:not_null`  | NOT NULL                        |
//! | `unique`      | `email:string:unique`    | UNIQUE                          |
//! | `check=`      | `n:int:check=n > 0`      | CHECK constraint                |
//! | anything else | `references users(id)`   | Appended verbatim               |

pub mod ast;
pub mod config;
pub mod drift;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod migration;
pub mod ops;
pub mod parser;
pub mod schema;
pub mod transpiler;

pub mod prelude {
    pub use crate::ast::*;
    pub use crate::config::MigroConfig;
    pub use crate::drift::{DriftReport, ReconcileSession, Reconciler, rollback_depth};
    pub use crate::engine::{CodeGenerator, GooseRunner, MigrationRunner, SqlcGenerator};
    pub use crate::error::*;
    pub use crate::migration::{MigrationDir, MigrationFile, MigrationVersion};
    pub use crate::ops::Migrator;
    pub use crate::parser::parse_columns;
    pub use crate::schema::{PgProbe, SchemaProbe};
    pub use crate::transpiler::ToSql;
}

/// Compile a column-spec batch into column-definition fragments.
///
/// # Example
///
/// ```
/// let sql = migro::compile("status:string:default=active").unwrap();
/// assert_eq!(sql, vec!["status VARCHAR DEFAULT 'active'"]);
/// ```
pub fn compile(input: &str) -> Result<Vec<String>, error::MigroError> {
    transpiler::compile(input)
}
