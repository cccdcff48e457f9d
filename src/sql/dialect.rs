//! Feature map for SQL dialects.
//!
//! The general principle is to strive to target only the generic (i.e.
//! default) dialect and add dialect-specifics only where the generic form is
//! not supported. Placeholder syntax is the one axis every dialect must pick
//! deliberately, since it is part of the driver contract.

use core::fmt::Debug;

use serde::{Deserialize, Serialize};

/// SQL dialect.
///
/// This only changes the output for a relatively small subset of features:
/// identifier quoting, placeholder syntax, LIMIT/OFFSET placement, string
/// concatenation and RETURNING support.
#[derive(
    Debug,
    PartialEq,
    Eq,
    Clone,
    Copy,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
    strum::EnumString,
    strum::EnumVariantNames,
)]
#[strum(serialize_all = "lowercase")]
pub enum Dialect {
    Ansi,
    MySql,
    Postgres,
    Sqlite,
}

impl Dialect {
    pub(crate) fn handler(&self) -> Box<dyn DialectHandler> {
        match self {
            Dialect::Ansi => Box::new(AnsiDialect),
            Dialect::MySql => Box::new(MySqlDialect),
            Dialect::Postgres => Box::new(PostgresDialect),
            Dialect::Sqlite => Box::new(SqliteDialect),
        }
    }
}

impl Default for Dialect {
    fn default() -> Self {
        Dialect::Postgres
    }
}

#[derive(Debug)]
pub struct AnsiDialect;
#[derive(Debug)]
pub struct MySqlDialect;
#[derive(Debug)]
pub struct PostgresDialect;
#[derive(Debug)]
pub struct SqliteDialect;

pub(crate) trait DialectHandler: Debug {
    fn ident_quote(&self) -> char {
        '"'
    }

    /// Named parameter placeholder. Placeholders are always named, never
    /// positional.
    fn placeholder(&self, name: &str) -> String {
        format!("$({name})")
    }

    /// Whether string concatenation spells CONCAT(…) instead of `||`.
    fn has_concat_function(&self) -> bool {
        false
    }

    /// Keyword rendering of a structural boolean. Literals written in
    /// lambdas never reach this; they are lifted into parameters.
    fn boolean_keyword(&self, value: bool) -> &'static str {
        if value {
            "TRUE"
        } else {
            "FALSE"
        }
    }

    fn supports_returning(&self) -> bool {
        false
    }

    fn limit_offset(&self, limit: Option<&str>, offset: Option<&str>) -> Option<String> {
        match (limit, offset) {
            (None, None) => None,
            (Some(l), None) => Some(format!("LIMIT {l}")),
            (Some(l), Some(o)) => Some(format!("LIMIT {l} OFFSET {o}")),
            (None, Some(o)) => Some(format!("OFFSET {o}")),
        }
    }
}

impl DialectHandler for PostgresDialect {
    fn supports_returning(&self) -> bool {
        true
    }
}

impl DialectHandler for SqliteDialect {
    fn placeholder(&self, name: &str) -> String {
        format!("@{name}")
    }

    fn boolean_keyword(&self, value: bool) -> &'static str {
        if value {
            "1"
        } else {
            "0"
        }
    }

    fn supports_returning(&self) -> bool {
        true
    }

    fn limit_offset(&self, limit: Option<&str>, offset: Option<&str>) -> Option<String> {
        match (limit, offset) {
            (None, None) => None,
            (Some(l), None) => Some(format!("LIMIT {l}")),
            (Some(l), Some(o)) => Some(format!("LIMIT {l} OFFSET {o}")),
            // SQLite has no offset-without-limit form; -1 is its documented
            // "no limit" sentinel.
            (None, Some(o)) => Some(format!("LIMIT -1 OFFSET {o}")),
        }
    }
}

impl DialectHandler for MySqlDialect {
    fn ident_quote(&self) -> char {
        '`'
    }

    fn placeholder(&self, name: &str) -> String {
        format!("@{name}")
    }

    fn has_concat_function(&self) -> bool {
        true
    }

    fn limit_offset(&self, limit: Option<&str>, offset: Option<&str>) -> Option<String> {
        match (limit, offset) {
            (None, None) => None,
            (Some(l), None) => Some(format!("LIMIT {l}")),
            (Some(l), Some(o)) => Some(format!("LIMIT {l} OFFSET {o}")),
            // https://dev.mysql.com/doc/refman/8.0/en/select.html — the
            // documented way to offset without limiting.
            (None, Some(o)) => Some(format!("LIMIT 18446744073709551615 OFFSET {o}")),
        }
    }
}

impl DialectHandler for AnsiDialect {
    fn limit_offset(&self, limit: Option<&str>, offset: Option<&str>) -> Option<String> {
        match (limit, offset) {
            (None, None) => None,
            (Some(l), None) => Some(format!("FETCH FIRST {l} ROWS ONLY")),
            (Some(l), Some(o)) => Some(format!("OFFSET {o} ROWS FETCH NEXT {l} ROWS ONLY")),
            (None, Some(o)) => Some(format!("OFFSET {o} ROWS")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_dialect_from_str() {
        assert_eq!(Dialect::from_str("postgres"), Ok(Dialect::Postgres));
        assert_eq!(Dialect::from_str("mysql"), Ok(Dialect::MySql));
        assert!(Dialect::from_str("foo").is_err());
    }

    #[test]
    fn test_offset_only_forms() {
        assert_eq!(
            Dialect::Sqlite.handler().limit_offset(None, Some("3")),
            Some("LIMIT -1 OFFSET 3".to_string())
        );
        assert_eq!(
            Dialect::Postgres.handler().limit_offset(None, Some("3")),
            Some("OFFSET 3".to_string())
        );
        assert_eq!(
            Dialect::Ansi.handler().limit_offset(Some("2"), Some("3")),
            Some("OFFSET 3 ROWS FETCH NEXT 2 ROWS ONLY".to_string())
        );
    }
}
