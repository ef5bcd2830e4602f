//! Column DSL parser using nom.
//!
//! Parses compact column specs into [`ColumnSpec`]s.
//!
//! # Syntax Overview
//!
//! ```text
//! email:string:not_null:unique , tags:text:array:default={}
//! ──┬── ──┬─── ───────┬───────   ─┬── ─┬── ────────┬────────
//!   │     │           │           │    │           │
//!   │     │           │           │    │           └── Options (array, default=, check=, raw)
//!   │     │           │           │    └── Type token (synonym table)
//!   │     │           │           └── Name
//!   │     │           └── Options
//!   │     └── Type token, optionally with a modifier: varchar(255)
//!   └── Name
//! ```
//!
//! Commas and colons inside `'...'`, `(...)` or `[...]` do not split, and a
//! `::` cast is kept inside its option.

use std::collections::HashSet;

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{alpha1, alphanumeric1, char, multispace0},
    combinator::{opt, recognize},
    error::{Error, ErrorKind},
    multi::{many0_count, separated_list1},
    sequence::{delimited, pair},
    IResult,
};

use crate::ast::*;
use crate::error::{MigroError, MigroResult};

/// Parse a complete batch of column specs.
///
/// The batch is atomic: one bad spec fails the whole input and no columns
/// are returned.
pub fn parse_columns(input: &str) -> MigroResult<Vec<ColumnSpec>> {
    let (remaining, segments) = parse_batch(input)
        .map_err(|e| MigroError::validation(input.trim(), format!("parse failed: {:?}", e)))?;
    if !remaining.is_empty() {
        return Err(MigroError::validation(
            input.trim(),
            format!("unexpected trailing content: '{}'", remaining),
        ));
    }

    let mut columns = Vec::new();
    let mut seen = HashSet::new();
    for parts in segments {
        if parts.iter().all(|p| p.trim().is_empty()) {
            continue;
        }
        let column = compile_segment(&parts)?;
        if !seen.insert(column.name.clone()) {
            return Err(MigroError::validation(&column.name, "column listed twice"));
        }
        columns.push(column);
    }

    if columns.is_empty() {
        return Err(MigroError::validation(input.trim(), "no column definitions found"));
    }
    Ok(columns)
}

/// Parse a comma-separated list of bare column names (`a,b:int,c`).
///
/// Anything after a colon is ignored, so full specs are accepted too.
pub fn parse_column_names(input: &str) -> MigroResult<Vec<String>> {
    let (_, segments) = parse_batch(input)
        .map_err(|e| MigroError::validation(input.trim(), format!("parse failed: {:?}", e)))?;

    let mut names: Vec<String> = Vec::new();
    for parts in segments {
        let name = parts.first().map(|p| p.trim()).unwrap_or_default();
        if name.is_empty() {
            continue;
        }
        validate_name(name)?;
        if names.iter().any(|n| n == name) {
            return Err(MigroError::validation(name, "column listed twice"));
        }
        names.push(name.to_string());
    }

    if names.is_empty() {
        return Err(MigroError::validation(input.trim(), "no column names found"));
    }
    Ok(names)
}

/// Split the batch into segments, each split into its colon-separated parts.
fn parse_batch(input: &str) -> IResult<&str, Vec<Vec<&str>>> {
    separated_list1(char(','), separated_list1(char(':'), parse_part))(input)
}

/// Parse one part up to the next top-level `:` or `,`.
///
/// A `'` opens a quoted run only at the start of a value or after one of
/// `= ( [ , '` or whitespace, so `it's` stays a plain word. A quote still
/// open at the end of input fails the whole batch.
fn parse_part(input: &str) -> IResult<&str, &str> {
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut prev: Option<char> = None;
    let mut chars = input.char_indices().peekable();
    let mut end = input.len();

    while let Some((i, c)) = chars.next() {
        let opens_quote = match prev {
            None => true,
            Some(p) => matches!(p, '=' | '(' | '[' | ',' | '\'') || p.is_whitespace(),
        };
        prev = Some(c);
        match c {
            '\'' if in_quote => in_quote = false,
            '\'' if opens_quote => in_quote = true,
            _ if in_quote => {}
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            ':' if depth == 0 => {
                // `::` is a cast, not a separator
                if matches!(chars.peek(), Some((_, ':'))) {
                    chars.next();
                    continue;
                }
                end = i;
                break;
            }
            ',' if depth == 0 => {
                end = i;
                break;
            }
            _ => {}
        }
    }

    if in_quote {
        return Err(nom::Err::Failure(Error::new(input, ErrorKind::Char)));
    }
    Ok((&input[end..], &input[..end]))
}

/// Parse an identifier (column name, type token).
fn parse_identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0_count(alt((alphanumeric1, tag("_")))),
    ))(input)
}

/// Parse a type token with an optional modifier: `varchar(255)`.
fn parse_type(input: &str) -> IResult<&str, (&str, Option<&str>)> {
    let (input, _) = multispace0(input)?;
    let (input, name) = parse_identifier(input)?;
    let (input, _) = multispace0(input)?;
    let (input, modifier) = opt(delimited(
        char('('),
        take_while1(|c: char| c != ')'),
        char(')'),
    ))(input)?;
    let (input, _) = multispace0(input)?;
    Ok((input, (name, modifier)))
}

/// Check that a table or column name is a plain identifier.
pub fn validate_identifier(name: &str, what: &str) -> MigroResult<()> {
    match parse_identifier(name) {
        Ok(("", _)) => Ok(()),
        _ => Err(MigroError::validation(
            name,
            format!("{} name must be an identifier ([A-Za-z_][A-Za-z0-9_]*)", what),
        )),
    }
}

fn validate_name(name: &str) -> MigroResult<()> {
    validate_identifier(name, "column")
}

/// Turn the parts of one `name:type[:option]*` segment into a column.
fn compile_segment(parts: &[&str]) -> MigroResult<ColumnSpec> {
    let name = parts[0].trim();
    validate_name(name)?;

    let type_token = parts.get(1).map(|t| t.trim()).unwrap_or_default();
    if type_token.is_empty() {
        return Err(MigroError::validation(name, "expected name:type[:option...]"));
    }

    let (base, modifier) = match parse_type(type_token) {
        Ok(("", (ty, modifier))) => {
            let base = BaseType::from_token(ty).ok_or_else(|| {
                MigroError::validation(name, format!("unknown type '{}'", type_token))
            })?;
            (base, modifier.map(|m| m.trim().to_string()))
        }
        _ => {
            return Err(MigroError::validation(
                name,
                format!("unknown type '{}'", type_token),
            ));
        }
    };

    let options: Vec<&str> = parts[2..]
        .iter()
        .map(|o| o.trim())
        .filter(|o| !o.is_empty())
        .collect();

    let is_array = options.iter().any(|o| o.eq_ignore_ascii_case("array"));
    let mut default = None;
    let mut constraints = Vec::new();

    for option in options {
        if option.eq_ignore_ascii_case("array") {
            continue;
        }
        if let Some(value) = option.strip_prefix("default=") {
            if value.trim().is_empty() {
                return Err(MigroError::validation(name, "empty default value"));
            }
            default = Some(value.trim().to_string());
        } else if let Some(expr) = option.strip_prefix("check=") {
            if expr.trim().is_empty() {
                return Err(MigroError::validation(name, "empty check expression"));
            }
            constraints.push(ColumnOption::Recognized(Constraint::Check(
                expr.trim().to_string(),
            )));
        } else if option == "not_null" {
            constraints.push(ColumnOption::Recognized(Constraint::NotNull));
        } else if option == "unique" {
            constraints.push(ColumnOption::Recognized(Constraint::Unique));
        } else {
            constraints.push(ColumnOption::Raw(option.to_string()));
        }
    }

    Ok(ColumnSpec {
        name: name.to_string(),
        sql_type: SqlType {
            base,
            modifier,
            is_array,
        },
        default,
        constraints,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_column() {
        let cols = parse_columns("email:string").unwrap();
        assert_eq!(cols.len(), 1);
        assert_eq!(cols[0].name, "email");
        assert_eq!(cols[0].sql_type.base, BaseType::Varchar);
        assert!(!cols[0].is_array());
        assert_eq!(cols[0].default, None);
        assert!(cols[0].constraints.is_empty());
    }

    #[test]
    fn test_multiple_columns_with_whitespace() {
        let cols = parse_columns(" name : String : not_null , age:INT ").unwrap();
        assert_eq!(cols.len(), 2);
        assert_eq!(cols[0].name, "name");
        assert_eq!(
            cols[0].constraints,
            vec![ColumnOption::Recognized(Constraint::NotNull)]
        );
        assert_eq!(cols[1].name, "age");
        assert_eq!(cols[1].sql_type.base, BaseType::Integer);
    }

    #[test]
    fn test_options_keep_order() {
        let cols = parse_columns("code:varchar:unique:references countries(code):not_null").unwrap();
        assert_eq!(
            cols[0].constraints,
            vec![
                ColumnOption::Recognized(Constraint::Unique),
                ColumnOption::Raw("references countries(code)".to_string()),
                ColumnOption::Recognized(Constraint::NotNull),
            ]
        );
        assert_eq!(cols[0].raw_tokens().collect::<Vec<_>>(), vec!["references countries(code)"]);
    }

    #[test]
    fn test_array_is_order_independent() {
        let cols = parse_columns("tags:text:default={}:array").unwrap();
        assert!(cols[0].is_array());
        assert_eq!(cols[0].default.as_deref(), Some("{}"));
    }

    #[test]
    fn test_type_modifier() {
        let cols = parse_columns("price:numeric(10,2):not_null,title:varchar(255)").unwrap();
        assert_eq!(cols.len(), 2);
        assert_eq!(cols[0].sql_type.modifier.as_deref(), Some("10,2"));
        assert_eq!(cols[1].sql_type.modifier.as_deref(), Some("255"));
    }

    #[test]
    fn test_check_with_quoted_commas() {
        let cols = parse_columns("status:text:check=status IN ('a','b'),n:int").unwrap();
        assert_eq!(cols.len(), 2);
        assert_eq!(
            cols[0].constraints,
            vec![ColumnOption::Recognized(Constraint::Check(
                "status IN ('a','b')".to_string()
            ))]
        );
    }

    #[test]
    fn test_apostrophe_inside_word_does_not_swallow_next_column() {
        let cols = parse_columns("note:text:default=it's,n:int").unwrap();
        assert_eq!(cols.len(), 2);
        assert_eq!(cols[0].default.as_deref(), Some("it's"));
        assert_eq!(cols[1].name, "n");
        assert_eq!(cols[1].sql_type.base, BaseType::Integer);
    }

    #[test]
    fn test_unterminated_quote_fails_batch() {
        let err = parse_columns("note:text:default='abc,n:int").unwrap_err();
        assert!(matches!(err, MigroError::Validation { .. }));
        assert!(parse_column_names("a,'b,c").is_err());
    }

    #[test]
    fn test_cast_inside_default() {
        let cols = parse_columns("day:date:default=now()::date").unwrap();
        assert_eq!(cols[0].default.as_deref(), Some("now()::date"));
    }

    #[test]
    fn test_empty_segments_skipped() {
        let cols = parse_columns("a:int,,b:bool,").unwrap();
        let names: Vec<_> = cols.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_unknown_type_fails_whole_batch() {
        let err = parse_columns("a:int,b:integr,c:text").unwrap_err();
        match err {
            MigroError::Validation { subject, message } => {
                assert_eq!(subject, "b");
                assert!(message.contains("integr"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_type() {
        assert!(matches!(
            parse_columns("a"),
            Err(MigroError::Validation { .. })
        ));
        assert!(matches!(
            parse_columns("a:"),
            Err(MigroError::Validation { .. })
        ));
    }

    #[test]
    fn test_bad_name() {
        assert!(parse_columns("1abc:int").is_err());
        assert!(parse_columns("first name:int").is_err());
    }

    #[test]
    fn test_duplicate_and_empty_batches() {
        assert!(parse_columns("a:int,a:text").is_err());
        assert!(parse_columns("").is_err());
        assert!(parse_columns(" , ").is_err());
    }

    #[test]
    fn test_empty_default_rejected() {
        assert!(parse_columns("a:int:default=").is_err());
    }

    #[test]
    fn test_column_names() {
        let names = parse_column_names("bio, avatar:text ,age").unwrap();
        assert_eq!(names, vec!["bio", "avatar", "age"]);
        assert!(parse_column_names("bio,bio").is_err());
        assert!(parse_column_names(",").is_err());
    }
}
