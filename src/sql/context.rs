//! Emission context: the dialect handler plus the aliasing state of the
//! query scope currently being rendered.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::ast::expr::{Column, ColumnSource, ParamRef};
use crate::error::{Error, Reason};
use crate::utils::NameGenerator;

use super::dialect::{Dialect, DialectHandler};

// Anything outside this set cannot be made safe by quoting alone (it could
// smuggle a quote character); dotted names cover JSON paths.
static VALID_IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_$.]*$").unwrap());

pub(super) struct Context {
    pub dialect: Box<dyn DialectHandler>,
    /// Base-table names by discovery index.
    pub tables: Vec<String>,
    /// Whether column references are table-qualified in the current scope.
    /// Single-table statements and wrapped subquery scopes render bare names.
    pub qualify: bool,
    pub subquery_names: NameGenerator,
}

impl Context {
    pub fn new(dialect: Dialect, tables: Vec<String>) -> Self {
        let qualify = tables.len() > 1;
        Context {
            dialect: dialect.handler(),
            tables,
            qualify,
            subquery_names: NameGenerator::new("w"),
        }
    }

    pub fn quote(&self, ident: &str) -> Result<String> {
        if !VALID_IDENT.is_match(ident) {
            return Err(Error::new(Reason::Guard(format!(
                "identifier `{ident}` contains characters that cannot be safely quoted"
            )))
            .into());
        }
        let quote = self.dialect.ident_quote();
        Ok(format!("{quote}{ident}{quote}"))
    }

    pub fn alias(&self, index: usize) -> String {
        format!("t{index}")
    }

    pub fn column(&self, column: &Column) -> Result<String> {
        match column.source {
            ColumnSource::Synthetic | ColumnSource::Direct => self.quote(&column.name),
            source => match source.table_index() {
                Some(index) if self.qualify => Ok(format!(
                    "{}.{}",
                    self.quote(&self.alias(index))?,
                    self.quote(&column.name)?
                )),
                _ => self.quote(&column.name),
            },
        }
    }

    pub fn placeholder(&self, param: &ParamRef) -> String {
        self.dialect.placeholder(&param.path())
    }
}
