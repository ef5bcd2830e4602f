//! SQL Transpiler for column specs.
//!
//! Renders compiled columns as column-definition fragments and assembles the
//! paired up/down bodies for each kind of generated migration.

use crate::ast::*;
use crate::error::{MigroError, MigroResult};
use crate::migration::PLACEHOLDER_PREFIX;
use crate::parser::{self, validate_identifier};
use crate::schema::ColumnDefinition;

/// Longest slug generated for multi-column migrations.
pub const MAX_SLUG_LEN: usize = 80;

/// Hex digits of the column hash in shortened slugs.
const SLUG_HASH_LEN: usize = 6;

/// Audit columns appended to every created table.
const AUDIT_COLUMNS: [&str; 3] = [
    "created_at timestamp DEFAULT CURRENT_TIMESTAMP",
    "updated_at timestamp DEFAULT CURRENT_TIMESTAMP",
    "deleted_at timestamp",
];

/// Trait for converting AST nodes to SQL.
pub trait ToSql {
    /// Convert this node to a SQL string.
    fn to_sql(&self) -> String;
}

impl ToSql for ColumnSpec {
    fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.sql_type);

        match &self.default {
            Some(value) => {
                sql.push_str(" DEFAULT ");
                sql.push_str(&format_default(value, &self.sql_type));
            }
            None if self.is_array() => {
                sql.push_str(&format!(" DEFAULT ARRAY[]::{}", self.sql_type));
            }
            None => {}
        }

        for option in &self.constraints {
            match option {
                ColumnOption::Recognized(Constraint::NotNull) => sql.push_str(" NOT NULL"),
                ColumnOption::Recognized(Constraint::Unique) => sql.push_str(" UNIQUE"),
                ColumnOption::Recognized(Constraint::Check(expr)) => {
                    sql.push_str(&format!(" CHECK({})", expr))
                }
                ColumnOption::Raw(token) => {
                    sql.push(' ');
                    sql.push_str(token);
                }
            }
        }

        sql
    }
}

impl ToSql for ColumnDefinition {
    fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.type_name());

        if let Some(len) = self.max_length {
            if self.is_character_type() {
                sql.push_str(&format!("({})", len));
            }
        }
        if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = self.default.as_deref().filter(|d| !d.is_empty()) {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }

        sql
    }
}

/// Format a default expression for the given column type.
///
/// Empty-set literals on arrays are cast to the array type, character
/// defaults are quoted unless they already are, everything else is verbatim.
pub fn format_default(value: &str, ty: &SqlType) -> String {
    if ty.is_array {
        if value == "{}" || value == "'{}'" {
            return format!("'{{}}'::{}", ty);
        }
        return value.to_string();
    }

    if ty.base.is_textual() {
        if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
            return value.to_string();
        }
        return format!("'{}'", value.replace('\'', "''"));
    }

    value.to_string()
}

/// Compile a column-spec batch into ordered column-definition fragments.
pub fn compile(input: &str) -> MigroResult<Vec<String>> {
    Ok(parser::parse_columns(input)?
        .iter()
        .map(|c| c.to_sql())
        .collect())
}

/// Paired forward/backward SQL plus the slug of the migration holding them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationScript {
    pub slug: String,
    pub up: String,
    pub down: String,
}

/// What a generated migration does; decides its slug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    CreateTable,
    AddColumns,
    DeleteColumns,
}

/// Singular form of a table name for its primary key.
///
/// `addresses` → `address`, `users` → `user`, `data` → `data`.
pub fn singularize(table: &str) -> &str {
    if let Some(stem) = table.strip_suffix("ses") {
        return &table[..stem.len() + 1];
    }
    table.strip_suffix('s').unwrap_or(table)
}

/// Deterministic slug for a generated migration.
pub fn migration_slug(kind: ChangeKind, table: &str, columns: &[&str]) -> String {
    let (verb, prep) = match kind {
        ChangeKind::CreateTable => return format!("create_{}", table),
        ChangeKind::AddColumns => ("add", "to"),
        ChangeKind::DeleteColumns => ("delete", "from"),
    };

    if let [only] = columns {
        return format!("{}_column_{}_{}_{}", verb, only, prep, table);
    }

    let joined = columns.join("_");
    let slug = format!("{}_columns_{}_{}_{}", verb, joined, prep, table);
    if slug.len() <= MAX_SLUG_LEN {
        return slug;
    }

    let digest = format!("{:x}", md5::compute(joined.as_bytes()));
    let hash = &digest[..SLUG_HASH_LEN];
    let first = columns.first().copied().unwrap_or_default();

    // Everything except the first column name has a fixed length.
    let fixed = format!("{}_columns__and_more_{}_{}_{}", verb, hash, prep, table).len();
    let room = MAX_SLUG_LEN.saturating_sub(fixed).max(1);
    let first = &first[..first.len().min(room)];

    let slug = format!("{}_columns_{}_and_more_{}_{}_{}", verb, first, hash, prep, table);
    slug[..slug.len().min(MAX_SLUG_LEN)].to_string()
}

/// Normalize a free-form migration name into a slug.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_matches('_').to_string()
}

/// Build the create-table migration.
pub fn create_table(table: &str, columns: &[ColumnSpec]) -> MigroResult<MigrationScript> {
    validate_identifier(table, "table")?;
    let primary_key = format!("{}_id", singularize(table));

    for col in columns {
        let reserved = col.name == primary_key
            || AUDIT_COLUMNS.iter().any(|a| a.split(' ').next() == Some(col.name.as_str()));
        if reserved {
            return Err(MigroError::validation(
                &col.name,
                "column is generated automatically for new tables",
            ));
        }
    }

    let mut defs = vec![format!("    {} serial primary key", primary_key)];
    defs.extend(columns.iter().map(|c| format!("    {}", c.to_sql())));
    defs.extend(AUDIT_COLUMNS.iter().map(|a| format!("    {}", a)));

    Ok(MigrationScript {
        slug: migration_slug(ChangeKind::CreateTable, table, &[]),
        up: format!("CREATE TABLE IF NOT EXISTS {}(\n{}\n);", table, defs.join(",\n")),
        down: format!("DROP TABLE IF EXISTS {};", table),
    })
}

/// Build the add-columns migration.
///
/// The down section only drops the added columns.
pub fn add_columns(table: &str, columns: &[ColumnSpec]) -> MigroResult<MigrationScript> {
    validate_identifier(table, "table")?;
    if columns.is_empty() {
        return Err(MigroError::validation(table, "no columns to add"));
    }

    let up: Vec<String> = columns
        .iter()
        .map(|c| format!("ALTER TABLE {} ADD COLUMN IF NOT EXISTS {};", table, c.to_sql()))
        .collect();
    let down: Vec<String> = columns
        .iter()
        .map(|c| format!("ALTER TABLE {} DROP COLUMN IF EXISTS {};", table, c.name))
        .collect();
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();

    Ok(MigrationScript {
        slug: migration_slug(ChangeKind::AddColumns, table, &names),
        up: up.join("\n"),
        down: down.join("\n"),
    })
}

/// Build the delete-columns migration from probed column definitions.
///
/// The down section recreates each column from its definition.
pub fn delete_columns(table: &str, columns: &[ColumnDefinition]) -> MigroResult<MigrationScript> {
    validate_identifier(table, "table")?;
    if columns.is_empty() {
        return Err(MigroError::validation(table, "no columns to delete"));
    }

    let up: Vec<String> = columns
        .iter()
        .map(|c| format!("ALTER TABLE {} DROP COLUMN IF EXISTS {};", table, c.name))
        .collect();
    let down: Vec<String> = columns
        .iter()
        .map(|c| format!("ALTER TABLE {} ADD COLUMN IF NOT EXISTS {};", table, c.to_sql()))
        .collect();
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();

    Ok(MigrationScript {
        slug: migration_slug(ChangeKind::DeleteColumns, table, &names),
        up: up.join("\n"),
        down: down.join("\n"),
    })
}

/// Commented template for a hand-written migration.
pub fn empty_script(name: &str) -> MigroResult<MigrationScript> {
    let slug = slugify(name);
    if slug.is_empty() {
        return Err(MigroError::validation(name, "migration name has no usable characters"));
    }
    if slug.starts_with(PLACEHOLDER_PREFIX) {
        return Err(MigroError::validation(
            name,
            format!("'{}' is reserved for placeholder migrations", PLACEHOLDER_PREFIX),
        ));
    }
    Ok(MigrationScript {
        up: format!(
            "-- Migration: {}\n-- Description: Add your migration description here",
            slug
        ),
        down: format!(
            "-- Rollback migration: {}\n-- Description: Add rollback description here",
            slug
        ),
        slug,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn one(spec: &str) -> String {
        compile(spec).unwrap().remove(0)
    }

    #[test]
    fn test_compile_is_deterministic() {
        let spec = "name:string:not_null,tags:text:array,score:float:default=0";
        assert_eq!(compile(spec).unwrap(), compile(spec).unwrap());
    }

    #[test]
    fn test_plain_fragments() {
        assert_eq!(one("age:int"), "age INTEGER");
        assert_eq!(one("email:string:not_null:unique"), "email VARCHAR NOT NULL UNIQUE");
        assert_eq!(one("at:timestamptz"), "at TIMESTAMP WITH TIME ZONE");
        assert_eq!(one("price:numeric(10,2)"), "price NUMERIC(10,2)");
        assert_eq!(one("qty:int:check=qty > 0"), "qty INTEGER CHECK(qty > 0)");
    }

    #[test]
    fn test_raw_tokens_pass_through() {
        assert_eq!(
            one("country_id:int:references countries(country_id)"),
            "country_id INTEGER references countries(country_id)"
        );
    }

    #[test]
    fn test_array_defaults() {
        assert_eq!(one("tags:text:array"), "tags TEXT[] DEFAULT ARRAY[]::TEXT[]");
        assert_eq!(one("tags:text:array:default={}"), "tags TEXT[] DEFAULT '{}'::TEXT[]");
        assert_eq!(one("tags:text:array:default='{}'"), "tags TEXT[] DEFAULT '{}'::TEXT[]");
        assert_eq!(
            one("ids:int:array:default='{1,2}'"),
            "ids INTEGER[] DEFAULT '{1,2}'"
        );
    }

    #[test]
    fn test_text_defaults_are_quoted() {
        assert_eq!(one("status:string:default=active"), "status VARCHAR DEFAULT 'active'");
        assert_eq!(one("status:text:default='active'"), "status TEXT DEFAULT 'active'");
        assert_eq!(one("note:text:default=it's"), "note TEXT DEFAULT 'it''s'");
        assert_eq!(one("n:int:default=0"), "n INTEGER DEFAULT 0");
        assert_eq!(one("ok:bool:default=true"), "ok BOOLEAN DEFAULT true");
    }

    #[test]
    fn test_apostrophe_default_keeps_following_columns() {
        assert_eq!(
            compile("note:text:default=it's,n:int").unwrap(),
            vec!["note TEXT DEFAULT 'it''s'", "n INTEGER"]
        );
    }

    #[test]
    fn test_unknown_type_emits_nothing() {
        assert!(compile("a:int,b:money").is_err());
    }

    #[test]
    fn test_singularize() {
        assert_eq!(singularize("addresses"), "address");
        assert_eq!(singularize("users"), "user");
        assert_eq!(singularize("data"), "data");
        assert_eq!(singularize("classes"), "class");
    }

    #[test]
    fn test_create_table() {
        let cols = parser::parse_columns("email:string:not_null,tags:text:array").unwrap();
        let script = create_table("users", &cols).unwrap();
        assert_eq!(script.slug, "create_users");
        assert_eq!(
            script.up,
            "CREATE TABLE IF NOT EXISTS users(\n    user_id serial primary key,\n    email VARCHAR NOT NULL,\n    tags TEXT[] DEFAULT ARRAY[]::TEXT[],\n    created_at timestamp DEFAULT CURRENT_TIMESTAMP,\n    updated_at timestamp DEFAULT CURRENT_TIMESTAMP,\n    deleted_at timestamp\n);"
        );
        assert_eq!(script.down, "DROP TABLE IF EXISTS users;");
    }

    #[test]
    fn test_create_table_rejects_generated_columns() {
        let cols = parser::parse_columns("created_at:timestamp").unwrap();
        assert!(create_table("users", &cols).is_err());
        let cols = parser::parse_columns("user_id:int").unwrap();
        assert!(create_table("users", &cols).is_err());
        assert!(create_table("bad name", &[]).is_err());
    }

    #[test]
    fn test_add_columns() {
        let cols = parser::parse_columns("bio:text,age:int:default=18").unwrap();
        let script = add_columns("users", &cols).unwrap();
        assert_eq!(script.slug, "add_columns_bio_age_to_users");
        assert_eq!(
            script.up,
            "ALTER TABLE users ADD COLUMN IF NOT EXISTS bio TEXT;\nALTER TABLE users ADD COLUMN IF NOT EXISTS age INTEGER DEFAULT 18;"
        );
        assert_eq!(
            script.down,
            "ALTER TABLE users DROP COLUMN IF EXISTS bio;\nALTER TABLE users DROP COLUMN IF EXISTS age;"
        );
    }

    #[test]
    fn test_delete_columns_recreates_definition() {
        let defs = vec![
            ColumnDefinition {
                name: "nickname".to_string(),
                data_type: "character varying".to_string(),
                udt_name: "varchar".to_string(),
                max_length: Some(50),
                nullable: false,
                default: Some("'anon'::character varying".to_string()),
            },
            ColumnDefinition {
                name: "tags".to_string(),
                data_type: "ARRAY".to_string(),
                udt_name: "_text".to_string(),
                max_length: None,
                nullable: true,
                default: None,
            },
        ];
        let script = delete_columns("users", &defs).unwrap();
        assert_eq!(script.slug, "delete_columns_nickname_tags_from_users");
        assert_eq!(
            script.up,
            "ALTER TABLE users DROP COLUMN IF EXISTS nickname;\nALTER TABLE users DROP COLUMN IF EXISTS tags;"
        );
        assert_eq!(
            script.down,
            "ALTER TABLE users ADD COLUMN IF NOT EXISTS nickname CHARACTER VARYING(50) NOT NULL DEFAULT 'anon'::character varying;\nALTER TABLE users ADD COLUMN IF NOT EXISTS tags TEXT[];"
        );
    }

    #[test]
    fn test_single_column_slugs() {
        assert_eq!(
            migration_slug(ChangeKind::AddColumns, "users", &["bio"]),
            "add_column_bio_to_users"
        );
        assert_eq!(
            migration_slug(ChangeKind::DeleteColumns, "users", &["bio"]),
            "delete_column_bio_from_users"
        );
    }

    #[test]
    fn test_long_slug_is_shortened() {
        let names = [
            "billing_address_line_one",
            "billing_address_line_two",
            "billing_postal_code",
            "billing_city_name",
            "billing_country_code",
            "billing_phone_number",
        ];
        let slug = migration_slug(ChangeKind::AddColumns, "customers", &names);
        let digest = format!("{:x}", md5::compute(names.join("_").as_bytes()));

        assert!(slug.len() <= MAX_SLUG_LEN);
        assert!(slug.starts_with("add_columns_billing_address_line_one_and_more_"));
        assert!(slug.ends_with(&format!("_{}_to_customers", &digest[..6])));
        assert_eq!(slug, migration_slug(ChangeKind::AddColumns, "customers", &names));
    }

    #[test]
    fn test_long_first_name_is_truncated_within_ceiling() {
        let long = "a".repeat(120);
        let names = [long.as_str(), "b"];
        let slug = migration_slug(ChangeKind::DeleteColumns, "t", &names);
        assert_eq!(slug.len(), MAX_SLUG_LEN);
        assert!(slug.contains("_and_more_"));
        assert!(slug.ends_with("_from_t"));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Add Users Index!"), "add_users_index");
        assert_eq!(slugify("  backfill--emails "), "backfill_emails");
        assert!(empty_script("!!!").is_err());
        assert_eq!(empty_script("Seed roles").unwrap().slug, "seed_roles");
        assert!(matches!(
            empty_script("temp table backfill"),
            Err(MigroError::Validation { .. })
        ));
    }
}
