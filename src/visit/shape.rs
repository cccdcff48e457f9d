//! Member-path resolution through bindings and result shapes.

use anyhow::Result;

use crate::ast::expr::{Column, ColumnSource, ValueExpr};
use crate::ast::shape::Shape;
use crate::error::{Error, Reason, Span};

use super::context::{Binding, VisitorContext};

/// What a member path resolved to.
pub(super) enum Resolution {
    Value(ValueExpr),
    /// A whole-row (or whole-record) reference, described by its shape.
    Reference(Shape),
}

/// Resolves `path` against what the row parameter stands for.
pub(super) fn resolve_path(
    ctx: &mut VisitorContext,
    binding: &Binding,
    path: &[String],
    span: Option<Span>,
) -> Result<Resolution> {
    match binding {
        Binding::Table { index } => {
            if path.is_empty() {
                return Ok(Resolution::Reference(Shape::Reference { table: *index }));
            }
            let column = resolve_table_column(ctx, *index, path, span)?;
            ctx.saw_column_ref = true;
            Ok(Resolution::Value(ValueExpr::Column(column)))
        }
        Binding::Shape(shape) => resolve_shape_path(ctx, shape, path, span),
        Binding::Group { key, .. } => match path.first().map(|s| s.as_str()) {
            Some("key") if path.len() == 1 => {
                ctx.saw_column_ref = true;
                Ok(Resolution::Value(key.clone()))
            }
            _ => Err(Error::new_simple(
                "only `key` and aggregate calls are available on a grouping",
            )
            .with_span(span)
            .into()),
        },
    }
}

/// Looks a column up in a base table, validating it against the schema.
/// Deeper paths are preserved as a dotted name when the column is JSON-typed.
pub(super) fn resolve_table_column(
    ctx: &VisitorContext,
    table_index: usize,
    path: &[String],
    span: Option<Span>,
) -> Result<Column> {
    let table = ctx.table_name(table_index).to_string();
    let column = &path[0];

    let def = ctx.schema.table_def(&table).ok_or_else(|| {
        Error::new(Reason::NotFound {
            name: table.clone(),
            namespace: "table".to_string(),
        })
        .with_span(span)
    })?;

    let ty = def.column(column).ok_or_else(|| {
        Error::new(Reason::NotFound {
            name: column.clone(),
            namespace: format!("column of table `{table}`"),
        })
        .with_span(span)
    })?;

    let name = if path.len() > 1 {
        if ty != crate::schema::ColumnType::Json {
            return Err(Error::new_simple(format!(
                "`{column}` is not a JSON column; nested member access is only \
                 available on JSON columns"
            ))
            .with_span(span)
            .into());
        }
        path.join(".")
    } else {
        column.clone()
    };

    let source = if ctx.direct_columns {
        ColumnSource::Direct
    } else {
        ColumnSource::Table { index: table_index }
    };
    Ok(Column { name, source })
}

fn resolve_shape_path(
    ctx: &mut VisitorContext,
    shape: &Shape,
    path: &[String],
    span: Option<Span>,
) -> Result<Resolution> {
    if path.is_empty() {
        return Ok(Resolution::Reference(shape.clone()));
    }
    let (name, rest) = path.split_first().expect("checked non-empty");

    match shape {
        Shape::Object(_) => {
            let field = shape.field(name).ok_or_else(|| {
                Error::new(Reason::NotFound {
                    name: name.clone(),
                    namespace: "result shape".to_string(),
                })
                .with_span(span)
            })?;
            let field = field.clone();
            resolve_shape_field(ctx, name, &field, rest, span)
        }
        Shape::Reference { table } => {
            let column = resolve_table_column(ctx, *table, path, span)?;
            ctx.saw_column_ref = true;
            Ok(Resolution::Value(ValueExpr::Column(Column {
                name: column.name,
                source: ColumnSource::JoinResult { table: *table },
            })))
        }
        Shape::Column { .. } | Shape::Computed(_) | Shape::Window => Err(Error::new(
            Reason::NotFound {
                name: name.clone(),
                namespace: "result shape".to_string(),
            },
        )
        .with_span(span)
        .into()),
    }
}

fn resolve_shape_field(
    ctx: &mut VisitorContext,
    name: &str,
    field: &Shape,
    rest: &[String],
    span: Option<Span>,
) -> Result<Resolution> {
    match field {
        Shape::Column { column, table } => {
            if !rest.is_empty() {
                return Err(Error::new(Reason::NotFound {
                    name: rest[0].clone(),
                    namespace: format!("field `{name}` of the result shape"),
                })
                .with_span(span)
                .into());
            }
            ctx.saw_column_ref = true;
            Ok(Resolution::Value(ValueExpr::Column(Column {
                name: column.clone(),
                source: ColumnSource::JoinResult { table: *table },
            })))
        }
        Shape::Window => {
            if !rest.is_empty() {
                return Err(Error::new_simple(format!(
                    "window column `{name}` has no fields"
                ))
                .with_span(span)
                .into());
            }
            ctx.saw_column_ref = true;
            Ok(Resolution::Value(ValueExpr::Column(Column {
                name: name.to_string(),
                source: ColumnSource::Synthetic,
            })))
        }
        Shape::Computed(expr) => {
            if !rest.is_empty() {
                return Err(Error::new_simple(format!(
                    "computed field `{name}` has no fields"
                ))
                .with_span(span)
                .into());
            }
            if contains_aggregate(expr) {
                return Err(Error::new(Reason::Unsupported {
                    construct: format!("filtering or ordering on aggregated field `{name}`"),
                })
                .with_span(span)
                .into());
            }
            ctx.saw_column_ref = true;
            Ok(Resolution::Value((**expr).clone()))
        }
        Shape::Reference { table } => {
            if rest.is_empty() {
                Ok(Resolution::Reference(field.clone()))
            } else {
                let column = resolve_table_column(ctx, *table, rest, span)?;
                ctx.saw_column_ref = true;
                Ok(Resolution::Value(ValueExpr::Column(Column {
                    name: column.name,
                    source: ColumnSource::JoinResult { table: *table },
                })))
            }
        }
        Shape::Object(_) => resolve_shape_path(ctx, field, rest, span),
    }
}

fn contains_aggregate(expr: &ValueExpr) -> bool {
    match expr {
        ValueExpr::Aggregate { .. } => true,
        ValueExpr::Arithmetic { left, right, .. } | ValueExpr::Concat { left, right } => {
            contains_aggregate(left) || contains_aggregate(right)
        }
        ValueExpr::StringMethod { object, .. } => contains_aggregate(object),
        ValueExpr::Coalesce(exprs) => exprs.iter().any(contains_aggregate),
        ValueExpr::Conditional {
            then, otherwise, ..
        } => contains_aggregate(then) || contains_aggregate(otherwise),
        _ => false,
    }
}
