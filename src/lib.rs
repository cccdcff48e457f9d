//! Compiler for typed arrow-lambda queries.
//! Targets parameterized SQL and exposes the operation-tree IR.
//!
//! You probably want to start with [define_select] and [to_sql].
//!
//! For more granular access, refer to this diagram:
//! ```ascii
//!      lambda source text
//!
//!       (parse) │
//!               │   parser::parse — chumsky lexer + parser
//!               ▼
//!          source AST
//!               │
//!     (resolve) │   visit::resolve_query — bindings, shapes, auto-params
//!               ▼
//!                        json_of_query
//!                      ────────►
//!       operation tree            QUERY JSON
//!                      ◄────────
//!               │        query_of_json
//!               │
//!        (emit) │   sql::compile — dialect policy
//!               ▼
//!
//!       { sql, params }
//! ```
//!
//! Every literal written in a lambda is lifted into a named `__pN` parameter;
//! the SQL text never embeds caller data.

pub mod ast;
mod cache;
mod error;
mod params;
mod parser;
mod plan;
mod schema;
pub mod sql;
#[cfg(test)]
mod test;
mod utils;
mod visit;

pub use cache::{clear_parse_cache, get_parse_cache_config, set_parse_cache_config, ParseCacheConfig};
pub use error::{ErrorMessage, ErrorMessages, SourceLocation, Span};
pub use params::{ParamValue, Params};
pub use plan::{
    delete, insert, update, Complete, DeleteBuilder, DeletePlan, Emittable, Initial,
    InsertBuilder, InsertPlan, ParsedQuery, SelectPlan, ToSql, UpdateBuilder, UpdatePlan,
    WithReturning, WithSet, WithValues,
};
pub use schema::{ColumnType, Schema};
pub use sql::{Dialect, Statement};
pub use visit::AutoParamInfo;

use std::sync::Arc;

use anyhow::anyhow;

use ast::ops::QueryKind;

/// Per-call knobs for the `define_*_with` entry points.
#[derive(Debug, Clone, Copy)]
pub struct DefineOptions {
    /// Set to `false` to bypass the parse cache, both read and write.
    pub cache: bool,
}

impl Default for DefineOptions {
    fn default() -> Self {
        DefineOptions { cache: true }
    }
}

/// Compile a select lambda into a [SelectPlan].
///
/// This is a wrapper for:
/// - `parser::parse_lambda` — build the source AST from the lambda text
/// - `visit::resolve_query` — resolve names, shapes and auto-parameters into
///   the operation tree
/// with the result memoized in the process-wide parse cache.
pub fn define_select(
    schema: &Schema,
    dialect: Dialect,
    source: &str,
) -> Result<SelectPlan, ErrorMessages> {
    define_select_with(schema, dialect, source, &DefineOptions::default())
}

pub fn define_select_with(
    schema: &Schema,
    dialect: Dialect,
    source: &str,
    options: &DefineOptions,
) -> Result<SelectPlan, ErrorMessages> {
    let parsed = parse_cached(schema, dialect, source, options, "select")?;
    Ok(SelectPlan { parsed, dialect })
}

/// Compile an `insertInto(...).values(...)` lambda into an [InsertPlan].
pub fn define_insert(
    schema: &Schema,
    dialect: Dialect,
    source: &str,
) -> Result<InsertPlan, ErrorMessages> {
    define_insert_with(schema, dialect, source, &DefineOptions::default())
}

pub fn define_insert_with(
    schema: &Schema,
    dialect: Dialect,
    source: &str,
    options: &DefineOptions,
) -> Result<InsertPlan, ErrorMessages> {
    let parsed = parse_cached(schema, dialect, source, options, "insert")?;
    Ok(InsertPlan { parsed, dialect })
}

/// Compile an `update(...).set(...)` lambda into an [UpdatePlan].
pub fn define_update(
    schema: &Schema,
    dialect: Dialect,
    source: &str,
) -> Result<UpdatePlan, ErrorMessages> {
    define_update_with(schema, dialect, source, &DefineOptions::default())
}

pub fn define_update_with(
    schema: &Schema,
    dialect: Dialect,
    source: &str,
    options: &DefineOptions,
) -> Result<UpdatePlan, ErrorMessages> {
    let parsed = parse_cached(schema, dialect, source, options, "update")?;
    Ok(UpdatePlan { parsed, dialect })
}

/// Compile a `deleteFrom(...)` lambda into a [DeletePlan].
pub fn define_delete(
    schema: &Schema,
    dialect: Dialect,
    source: &str,
) -> Result<DeletePlan, ErrorMessages> {
    define_delete_with(schema, dialect, source, &DefineOptions::default())
}

pub fn define_delete_with(
    schema: &Schema,
    dialect: Dialect,
    source: &str,
    options: &DefineOptions,
) -> Result<DeletePlan, ErrorMessages> {
    let parsed = parse_cached(schema, dialect, source, options, "delete")?;
    Ok(DeletePlan { parsed, dialect })
}

/// Emit SQL and the merged parameter record from any plan. Runtime
/// parameters win name collisions with auto-parameters; the reserved `__p`
/// prefix is rejected.
pub fn to_sql<P: ToSql>(plan: &P, runtime_params: &Params) -> Result<Statement, ErrorMessages> {
    plan.to_sql(runtime_params)
}

/// JSON serialization of an operation tree.
pub fn json_of_query(query: &ast::ops::Query) -> Result<String, ErrorMessages> {
    serde_json::to_string(query).map_err(|e| error::downcast(anyhow!(e)))
}

/// JSON deserialization of an operation tree.
pub fn query_of_json(json: &str) -> Result<ast::ops::Query, ErrorMessages> {
    serde_json::from_str(json).map_err(|e| error::downcast(anyhow!(e)))
}

fn parse_cached(
    schema: &Schema,
    dialect: Dialect,
    source: &str,
    options: &DefineOptions,
    expected_kind: &'static str,
) -> Result<Arc<ParsedQuery>, ErrorMessages> {
    if options.cache {
        if let Some(hit) = cache::lookup(source, dialect) {
            log::debug!("parse cache hit for dialect {dialect}");
            check_kind(&hit, expected_kind, source)?;
            return Ok(hit);
        }
    }

    let resolved = parser::parse_lambda(source)
        .and_then(|arrow| visit::resolve_query(schema, &arrow))
        .map_err(error::downcast)
        .map_err(|e| e.composed("lambda", source, false))?;

    let parsed = Arc::new(ParsedQuery {
        query: resolved.query,
        auto_params: resolved.auto_params,
        param_infos: resolved.param_infos,
        source: source.to_string(),
    });

    check_kind(&parsed, expected_kind, source)?;

    if options.cache {
        cache::store(source, dialect, parsed.clone());
    }
    Ok(parsed)
}

fn check_kind(
    parsed: &ParsedQuery,
    expected: &'static str,
    source: &str,
) -> Result<(), ErrorMessages> {
    let actual = match parsed.query.kind {
        QueryKind::Select(_) => "select",
        QueryKind::Insert(_) => "insert",
        QueryKind::Update(_) => "update",
        QueryKind::Delete(_) => "delete",
    };
    if actual == expected {
        return Ok(());
    }
    Err(error::downcast(
        error::Error::new(error::Reason::Structural(format!(
            "expected a {expected} chain, but the lambda builds a {actual} statement"
        )))
        .into(),
    )
    .composed("lambda", source, false))
}
