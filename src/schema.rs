//! Schema probing against the live database.
//!
//! Every lookup reads `information_schema`; nothing here writes.

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::{MigroError, MigroResult};

/// Definition of an existing column, as reported by `information_schema`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: String,
    pub udt_name: String,
    pub max_length: Option<i32>,
    pub nullable: bool,
    pub default: Option<String>,
}

impl ColumnDefinition {
    /// SQL type name, with array element types resolved from the udt name.
    pub fn type_name(&self) -> String {
        if self.data_type.eq_ignore_ascii_case("ARRAY") {
            let element = self.udt_name.trim_start_matches('_');
            return format!("{}[]", element.to_ascii_uppercase());
        }
        self.data_type.to_ascii_uppercase()
    }

    pub fn is_character_type(&self) -> bool {
        matches!(
            self.data_type.as_str(),
            "character varying" | "varchar" | "character" | "char"
        )
    }
}

/// Read-only view of the database schema.
pub trait SchemaProbe {
    async fn table_exists(&self, table: &str) -> MigroResult<bool>;

    async fn column_exists(&self, table: &str, column: &str) -> MigroResult<bool>;

    /// Full definition of one column, or `None` when it does not exist.
    async fn column_definition(
        &self,
        table: &str,
        column: &str,
    ) -> MigroResult<Option<ColumnDefinition>>;

    /// Column names of a table in ordinal order.
    async fn list_columns(&self, table: &str) -> MigroResult<Vec<String>>;
}

/// PostgreSQL schema probe.
#[derive(Clone)]
pub struct PgProbe {
    pool: PgPool,
}

impl PgProbe {
    /// Connect using a `postgres://` URL.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let probe = PgProbe::connect("postgres://localhost/app").await?;
    /// ```
    pub async fn connect(url: &str) -> MigroResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| MigroError::Connection(e.to_string()))?;

        tracing::debug!("connected to database");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl SchemaProbe for PgProbe {
    async fn table_exists(&self, table: &str) -> MigroResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_schema = current_schema() AND table_name = $1)",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(table, exists, "probed table");
        Ok(exists)
    }

    async fn column_exists(&self, table: &str, column: &str) -> MigroResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.columns WHERE table_schema = current_schema() AND table_name = $1 AND column_name = $2)",
        )
        .bind(table)
        .bind(column)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(table, column, exists, "probed column");
        Ok(exists)
    }

    async fn column_definition(
        &self,
        table: &str,
        column: &str,
    ) -> MigroResult<Option<ColumnDefinition>> {
        let row: Option<(String, String, String, Option<i32>, bool, Option<String>)> =
            sqlx::query_as(
                "SELECT column_name::text, data_type::text, udt_name::text, \
                 character_maximum_length::int4, (is_nullable = 'YES') AS nullable, \
                 column_default::text \
                 FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = $1 AND column_name = $2",
            )
            .bind(table)
            .bind(column)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(
            |(name, data_type, udt_name, max_length, nullable, default)| ColumnDefinition {
                name,
                data_type,
                udt_name,
                max_length,
                nullable,
                default,
            },
        ))
    }

    async fn list_columns(&self, table: &str) -> MigroResult<Vec<String>> {
        let columns: Vec<String> = sqlx::query_scalar(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 \
             ORDER BY ordinal_position",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        Ok(columns)
    }
}
