//! Result-shape descriptions for `select` and `join` projections.
//!
//! A [Shape] records, for each field of a projected record, where the value
//! came from, so that downstream visitors can resolve member paths such as
//! `joined.u.name` back to a base-table column.

use serde::{Deserialize, Serialize};

use super::expr::ValueExpr;

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub enum Shape {
    /// A base table's column.
    Column { column: String, table: usize },
    /// An entire table row, bound under one name by a join selector.
    Reference { table: usize },
    /// A nested record; entry order is projection order.
    Object(Vec<(String, Shape)>),
    /// A field backed by a computed (non-column) expression. The expression
    /// is kept so later filters can inline it.
    Computed(Box<ValueExpr>),
    /// A field backed by a window expression; filtering on it forces the
    /// projection into a subquery.
    Window,
}

impl Shape {
    pub fn field(&self, name: &str) -> Option<&Shape> {
        match self {
            Shape::Object(entries) => entries
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, shape)| shape),
            _ => None,
        }
    }

    pub fn has_window_field(&self) -> bool {
        match self {
            Shape::Window => true,
            Shape::Object(entries) => entries.iter().any(|(_, s)| s.has_window_field()),
            _ => false,
        }
    }
}
