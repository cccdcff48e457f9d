//! Backend for translating the operation tree into a SQL string.
//!
//! Emission writes the statement text directly (placeholder syntax and
//! byte-stable clause layout are part of the output contract), parameterized
//! by a [dialect::DialectHandler] for the handful of syntactic variants that
//! differ between engines.

mod context;
mod dialect;
mod gen_expr;
mod gen_query;

pub use dialect::Dialect;

use serde::Serialize;

use crate::params::Params;

pub(crate) use gen_query::compile;

/// The emitted statement: SQL text plus the parameter record it references
/// (auto-parameters merged with the caller's runtime parameters).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    pub sql: String,
    pub params: Params,
}
