//! Column specification AST.
//!
//! A column spec such as `tags:text:array:not_null` compiles to a
//! [`ColumnSpec`]; the transpiler renders it as a column-definition fragment.

use std::fmt;

/// Semantic base type, resolved through the synonym table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseType {
    Varchar,
    Integer,
    BigInt,
    Boolean,
    Float,
    Double,
    Numeric,
    Text,
    Json,
    Jsonb,
    Uuid,
    Date,
    Timestamp,
    TimestampTz,
}

impl BaseType {
    /// Resolve a type token case-insensitively. Unknown tokens yield `None`.
    pub fn from_token(token: &str) -> Option<Self> {
        let ty = match token.trim().to_ascii_lowercase().as_str() {
            "string" | "varchar" => Self::Varchar,
            "int" | "integer" => Self::Integer,
            "bigint" => Self::BigInt,
            "bool" | "boolean" => Self::Boolean,
            "float" => Self::Float,
            "double" => Self::Double,
            "decimal" | "numeric" => Self::Numeric,
            "text" => Self::Text,
            "json" => Self::Json,
            "jsonb" => Self::Jsonb,
            "uuid" => Self::Uuid,
            "date" => Self::Date,
            "timestamp" | "datetime" => Self::Timestamp,
            "timestamptz" => Self::TimestampTz,
            _ => return None,
        };
        Some(ty)
    }

    /// The SQL spelling of this type.
    pub fn sql_name(&self) -> &'static str {
        match self {
            Self::Varchar => "VARCHAR",
            Self::Integer => "INTEGER",
            Self::BigInt => "BIGINT",
            Self::Boolean => "BOOLEAN",
            Self::Float => "FLOAT",
            Self::Double => "DOUBLE PRECISION",
            Self::Numeric => "NUMERIC",
            Self::Text => "TEXT",
            Self::Json => "JSON",
            Self::Jsonb => "JSONB",
            Self::Uuid => "UUID",
            Self::Date => "DATE",
            Self::Timestamp => "TIMESTAMP",
            Self::TimestampTz => "TIMESTAMP WITH TIME ZONE",
        }
    }

    /// Character types get their defaults auto-quoted.
    pub fn is_textual(&self) -> bool {
        matches!(self, Self::Varchar | Self::Text)
    }
}

/// A base type plus an optional verbatim modifier, e.g. `(255)` or `(10,2)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlType {
    pub base: BaseType,
    pub modifier: Option<String>,
    pub is_array: bool,
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base.sql_name())?;
        if let Some(m) = &self.modifier {
            write!(f, "({})", m)?;
        }
        if self.is_array {
            write!(f, "[]")?;
        }
        Ok(())
    }
}

/// Column constraints the DSL understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    NotNull,
    Unique,
    Check(String),
}

/// A constraint token: either recognized, or passed through verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnOption {
    Recognized(Constraint),
    Raw(String),
}

/// One compiled column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub sql_type: SqlType,
    /// Default expression as written, before type-directed formatting.
    pub default: Option<String>,
    /// Constraints in the order they were written.
    pub constraints: Vec<ColumnOption>,
}

impl ColumnSpec {
    pub fn is_array(&self) -> bool {
        self.sql_type.is_array
    }

    /// Raw tokens that were not recognized as constraints.
    pub fn raw_tokens(&self) -> impl Iterator<Item = &str> {
        self.constraints.iter().filter_map(|c| match c {
            ColumnOption::Raw(token) => Some(token.as_str()),
            ColumnOption::Recognized(_) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synonyms_resolve_case_insensitively() {
        assert_eq!(BaseType::from_token("String"), Some(BaseType::Varchar));
        assert_eq!(BaseType::from_token("INT"), Some(BaseType::Integer));
        assert_eq!(BaseType::from_token("datetime"), Some(BaseType::Timestamp));
        assert_eq!(BaseType::from_token("Decimal"), Some(BaseType::Numeric));
        assert_eq!(BaseType::from_token("integr"), None);
        assert_eq!(BaseType::from_token(""), None);
    }

    #[test]
    fn test_sql_type_display() {
        let ty = SqlType {
            base: BaseType::Numeric,
            modifier: Some("10,2".to_string()),
            is_array: false,
        };
        assert_eq!(ty.to_string(), "NUMERIC(10,2)");

        let ty = SqlType {
            base: BaseType::Double,
            modifier: None,
            is_array: true,
        };
        assert_eq!(ty.to_string(), "DOUBLE PRECISION[]");
    }
}
