//! Lowers source expressions into [ValueExpr], lifting literals into
//! auto-parameters as it goes.

use anyhow::Result;

use crate::ast::expr::*;
use crate::ast::shape::Shape;
use crate::ast::source::{self, Arrow, BinOp, Literal, UnOp};
use crate::error::{Error, Reason, Span};
use crate::params::ParamValue;
use crate::schema::ColumnType;

use super::context::{Binding, VisitorContext};
use super::shape::{resolve_path, Resolution};
use super::{predicate, window};

pub(super) fn lower_value(ctx: &mut VisitorContext, expr: &source::Expr) -> Result<ValueExpr> {
    let span = expr.span;
    match &expr.kind {
        source::ExprKind::Literal(lit) => Ok(lower_literal(ctx, lit)),

        source::ExprKind::Ident(_) | source::ExprKind::Member { .. } => {
            match lower_path(ctx, expr)? {
                Resolution::Value(value) => Ok(value),
                Resolution::Reference(shape) => reference_value(&shape, span),
            }
        }

        source::ExprKind::Binary { left, op, right } => {
            lower_binary(ctx, expr, left, *op, right, span)
        }

        source::ExprKind::Unary { op, expr: inner } => match op {
            UnOp::Neg => match &inner.kind {
                source::ExprKind::Literal(Literal::Integer(i)) => {
                    Ok(lower_literal(ctx, &Literal::Integer(-i)))
                }
                source::ExprKind::Literal(Literal::Float(f)) => {
                    Ok(lower_literal(ctx, &Literal::Float(-f)))
                }
                _ => Err(Error::new(Reason::Unsupported {
                    construct: "unary minus on a non-literal".to_string(),
                })
                .with_span(span)
                .into()),
            },
            UnOp::Not => Ok(ValueExpr::Bool(Box::new(predicate::lower_bool(ctx, expr)?))),
        },

        source::ExprKind::Conditional {
            condition,
            then,
            otherwise,
        } => {
            let condition = Box::new(predicate::lower_bool(ctx, condition)?);
            let then = Box::new(lower_value(ctx, then)?);
            let otherwise = Box::new(lower_value(ctx, otherwise)?);
            Ok(ValueExpr::Conditional {
                condition,
                then,
                otherwise,
            })
        }

        source::ExprKind::Call { callee, args } => lower_call(ctx, expr, callee, args, span),

        source::ExprKind::Index { .. } => Err(Error::new(Reason::Unsupported {
            construct: "computed member access".to_string(),
        })
        .with_span(span)
        .into()),

        kind => Err(Error::new(Reason::Unsupported {
            construct: format!("{} in a value position", kind.name()),
        })
        .with_span(span)
        .into()),
    }
}

fn lower_literal(ctx: &mut VisitorContext, lit: &Literal) -> ValueExpr {
    let value = match lit {
        Literal::Null | Literal::Undefined => return ValueExpr::Constant(Constant::Null),
        Literal::Boolean(b) => ParamValue::Bool(*b),
        Literal::Integer(i) => ParamValue::Int(*i),
        Literal::Float(f) => ParamValue::Float(*f),
        Literal::String(s) => ParamValue::String(s.clone()),
    };
    ValueExpr::Param(ParamRef::new(ctx.fresh_param(value)))
}

fn lower_binary(
    ctx: &mut VisitorContext,
    whole: &source::Expr,
    left: &source::Expr,
    op: BinOp,
    right: &source::Expr,
    span: Option<Span>,
) -> Result<ValueExpr> {
    if op.is_comparison() || op == BinOp::And {
        return Ok(ValueExpr::Bool(Box::new(predicate::lower_bool(ctx, whole)?)));
    }

    match op {
        BinOp::Coalesce => {
            let l = lower_value(ctx, left)?;
            let r = lower_value(ctx, right)?;
            Ok(match l {
                ValueExpr::Coalesce(mut exprs) => {
                    exprs.push(r);
                    ValueExpr::Coalesce(exprs)
                }
                _ => ValueExpr::Coalesce(vec![l, r]),
            })
        }
        // `||` with a boolean left side stays logical; with a value left side
        // it is the optional-default pattern and lowers to COALESCE.
        BinOp::Or => {
            if is_boolean_expr(ctx, left) {
                Ok(ValueExpr::Bool(Box::new(predicate::lower_bool(ctx, whole)?)))
            } else {
                let l = lower_value(ctx, left)?;
                let r = lower_value(ctx, right)?;
                Ok(match l {
                    ValueExpr::Coalesce(mut exprs) => {
                        exprs.push(r);
                        ValueExpr::Coalesce(exprs)
                    }
                    _ => ValueExpr::Coalesce(vec![l, r]),
                })
            }
        }
        op if op.is_arithmetic() => {
            let l = lower_value(ctx, left)?;
            let r = lower_value(ctx, right)?;

            if op == BinOp::Add && (is_stringish(ctx, &l) || is_stringish(ctx, &r)) {
                return Ok(ValueExpr::Concat {
                    left: Box::new(l),
                    right: Box::new(r),
                });
            }

            let op = match op {
                BinOp::Add => ArithOp::Add,
                BinOp::Sub => ArithOp::Sub,
                BinOp::Mul => ArithOp::Mul,
                BinOp::Div => ArithOp::Div,
                BinOp::Mod => ArithOp::Mod,
                _ => unreachable!("checked arithmetic operator"),
            };
            Ok(ValueExpr::Arithmetic {
                op,
                left: Box::new(l),
                right: Box::new(r),
            })
        }

        _ => Err(Error::new(Reason::Unsupported {
            construct: format!("operator `{op}` in a value position"),
        })
        .with_span(span)
        .into()),
    }
}

fn lower_call(
    ctx: &mut VisitorContext,
    whole: &source::Expr,
    callee: &source::Expr,
    args: &[source::Expr],
    span: Option<Span>,
) -> Result<ValueExpr> {
    if let Some(result) = window::maybe_window(ctx, whole) {
        let window = result?;
        if !ctx.in_select_projection {
            return Err(Error::new_simple(
                "window functions are only available inside select projections",
            )
            .with_span(span)
            .into());
        }
        ctx.saw_column_ref = true;
        return Ok(ValueExpr::Window(window));
    }

    let (object, method) = match &callee.kind {
        source::ExprKind::Member { object, property } => (object.as_ref(), property.as_str()),
        _ => {
            return Err(Error::new(Reason::Unsupported {
                construct: "calling a non-method expression".to_string(),
            })
            .with_span(span)
            .into())
        }
    };

    match method {
        "toLowerCase" | "toUpperCase" => {
            expect_arg_count(method, args, 0, span)?;
            let object = Box::new(lower_value(ctx, object)?);
            let method = if method == "toLowerCase" {
                StringMethod::ToLower
            } else {
                StringMethod::ToUpper
            };
            Ok(ValueExpr::StringMethod { object, method })
        }

        // Aggregates over a grouping.
        "count" | "sum" | "avg" | "average" | "min" | "max"
            if group_binding(ctx, object).is_some() =>
        {
            let element = group_binding(ctx, object).expect("checked above");
            let func = match method {
                "count" => AggregateFunc::Count,
                "sum" => AggregateFunc::Sum,
                "avg" | "average" => AggregateFunc::Avg,
                "min" => AggregateFunc::Min,
                "max" => AggregateFunc::Max,
                _ => unreachable!(),
            };
            let expr = if func == AggregateFunc::Count {
                expect_arg_count(method, args, 0, span)?;
                None
            } else {
                expect_arg_count(method, args, 1, span)?;
                let selector = expect_arrow(&args[0], method)?;
                Some(Box::new(lower_key_selector(ctx, selector, element)?))
            };
            ctx.saw_column_ref = true;
            Ok(ValueExpr::Aggregate { func, expr })
        }

        // Boolean-producing calls in a value position.
        "startsWith" | "endsWith" | "includes" | "contains" | "iequals" | "istartsWith"
        | "iendsWith" | "icontains" => Ok(ValueExpr::Bool(Box::new(predicate::lower_bool(
            ctx, whole,
        )?))),

        _ => Err(Error::new(Reason::NotFound {
            name: method.to_string(),
            namespace: "method".to_string(),
        })
        .with_span(span)
        .into()),
    }
}

fn group_binding(ctx: &VisitorContext, object: &source::Expr) -> Option<Binding> {
    let name = object.kind.as_ident()?;
    match ctx.binding(name) {
        Some(Binding::Group { element, .. }) => Some((**element).clone()),
        _ => None,
    }
}

/// Resolves an identifier or member path: row-parameter paths through their
/// binding, external-parameter paths into [ParamRef]s.
pub(super) fn lower_path(ctx: &mut VisitorContext, expr: &source::Expr) -> Result<Resolution> {
    let span = expr.span;
    let (base, path) = member_path(expr).ok_or_else(|| {
        Error::new(Reason::Unsupported {
            construct: expr.kind.name().to_string(),
        })
        .with_span(span)
    })?;

    if let Some(binding) = ctx.binding(&base).cloned() {
        return resolve_path(ctx, &binding, &path, span);
    }

    if ctx.is_query_param(&base) {
        if path.is_empty() {
            return Err(Error::new_simple(
                "the parameter object cannot be used as a value; access one of its properties",
            )
            .with_span(span)
            .into());
        }
        let name = path[0].clone();
        let property = if path.len() > 1 {
            Some(path[1..].join("."))
        } else {
            None
        };
        return Ok(Resolution::Value(ValueExpr::Param(ParamRef {
            name,
            property,
        })));
    }

    if ctx.is_helper(&base) {
        return Err(Error::new(Reason::Unsupported {
            construct: "using the helpers object as a value".to_string(),
        })
        .with_span(span)
        .into());
    }

    Err(Error::new(Reason::NotFound {
        name: base,
        namespace: "identifier".to_string(),
    })
    .with_span(span)
    .into())
}

/// Splits a member chain into its base identifier and property path.
pub(super) fn member_path(expr: &source::Expr) -> Option<(String, Vec<String>)> {
    match &expr.kind {
        source::ExprKind::Ident(name) => Some((name.clone(), vec![])),
        source::ExprKind::Member { object, property } => {
            let (base, mut path) = member_path(object)?;
            path.push(property.clone());
            Some((base, path))
        }
        _ => None,
    }
}

fn reference_value(shape: &Shape, span: Option<Span>) -> Result<ValueExpr> {
    match shape {
        Shape::Reference { table } => Ok(ValueExpr::Reference(ColumnSource::Table {
            index: *table,
        })),
        _ => Err(Error::new(Reason::Unsupported {
            construct: "using a whole result record as a scalar value".to_string(),
        })
        .with_span(span)
        .into()),
    }
}

/// Whether the source expression will lower to something boolean, deciding
/// `||` between logical OR and COALESCE.
pub(super) fn is_boolean_expr(ctx: &VisitorContext, expr: &source::Expr) -> bool {
    match &expr.kind {
        source::ExprKind::Literal(Literal::Boolean(_)) => true,
        source::ExprKind::Binary { op, .. } => {
            op.is_comparison() || matches!(op, BinOp::And | BinOp::Or)
        }
        source::ExprKind::Unary { op: UnOp::Not, .. } => true,
        source::ExprKind::Call { callee, .. } => matches!(
            &callee.kind,
            source::ExprKind::Member { property, .. }
                if matches!(property.as_str(), "startsWith" | "endsWith" | "includes" | "contains")
        ),
        source::ExprKind::Ident(_) | source::ExprKind::Member { .. } => {
            peek_column_type(ctx, expr) == Some(ColumnType::Bool)
        }
        _ => false,
    }
}

/// Reads the schema type of a member path without touching context state.
pub(super) fn peek_column_type(ctx: &VisitorContext, expr: &source::Expr) -> Option<ColumnType> {
    let (base, path) = member_path(expr)?;
    let binding = ctx.binding(&base)?;
    peek_binding_column_type(ctx, binding, &path)
}

fn peek_binding_column_type(
    ctx: &VisitorContext,
    binding: &Binding,
    path: &[String],
) -> Option<ColumnType> {
    match binding {
        Binding::Table { index } => {
            if path.len() == 1 {
                ctx.column_type(*index, &path[0])
            } else {
                None
            }
        }
        Binding::Shape(shape) => peek_shape_column_type(ctx, shape, path),
        Binding::Group { .. } => None,
    }
}

fn peek_shape_column_type(
    ctx: &VisitorContext,
    shape: &Shape,
    path: &[String],
) -> Option<ColumnType> {
    let (name, rest) = path.split_first()?;
    match shape {
        Shape::Object(_) => match shape.field(name)? {
            Shape::Column { column, table } if rest.is_empty() => ctx.column_type(*table, column),
            Shape::Reference { table } => {
                if rest.len() == 1 {
                    ctx.column_type(*table, &rest[0])
                } else {
                    None
                }
            }
            nested @ Shape::Object(_) => peek_shape_column_type(ctx, nested, rest),
            _ => None,
        },
        Shape::Reference { table } if rest.is_empty() => ctx.column_type(*table, name),
        _ => None,
    }
}

/// The type of a lowered column, when it can be read off the schema.
pub(super) fn lowered_column_type(ctx: &VisitorContext, column: &Column) -> Option<ColumnType> {
    let index = match column.source {
        ColumnSource::Direct => 0,
        ColumnSource::Synthetic => return None,
        other => other.table_index()?,
    };
    ctx.column_type(index, &column.name)
}

/// Whether an already-lowered expression is string-valued, deciding `+`
/// between arithmetic and concatenation.
fn is_stringish(ctx: &VisitorContext, expr: &ValueExpr) -> bool {
    match expr {
        ValueExpr::Concat { .. } | ValueExpr::StringMethod { .. } => true,
        ValueExpr::Constant(Constant::String(_)) => true,
        ValueExpr::Column(column) => lowered_column_type(ctx, column) == Some(ColumnType::Text),
        ValueExpr::Param(p) if p.property.is_none() => matches!(
            ctx.auto_params.get(&p.name),
            Some(ParamValue::String(_))
        ),
        ValueExpr::Coalesce(exprs) => exprs.first().is_some_and(|e| is_stringish(ctx, e)),
        _ => false,
    }
}

pub(super) fn expect_arrow<'a>(expr: &'a source::Expr, who: &str) -> Result<&'a Arrow> {
    match &expr.kind {
        source::ExprKind::Arrow(arrow) => Ok(arrow),
        kind => Err(Error::new(Reason::Expected {
            who: Some(format!("`{who}`")),
            expected: "a lambda argument".to_string(),
            found: kind.name().to_string(),
        })
        .with_span(expr.span)
        .into()),
    }
}

pub(super) fn expect_arg_count(
    who: &str,
    args: &[source::Expr],
    count: usize,
    span: Option<Span>,
) -> Result<()> {
    if args.len() == count {
        Ok(())
    } else {
        Err(Error::new(Reason::Expected {
            who: Some(format!("`{who}`")),
            expected: format!("{count} arguments"),
            found: args.len().to_string(),
        })
        .with_span(span)
        .into())
    }
}

/// Lowers a single-value key selector (`orderBy`, `groupBy`, join keys,
/// window partitions), binding its row parameter.
pub(super) fn lower_key_selector(
    ctx: &mut VisitorContext,
    arrow: &Arrow,
    binding: Binding,
) -> Result<ValueExpr> {
    let param = single_param(arrow)?;
    ctx.scoped(&param, binding, |ctx| lower_value(ctx, &arrow.body))
}

pub(super) fn single_param(arrow: &Arrow) -> Result<String> {
    match arrow.params.as_slice() {
        [param] => Ok(param.clone()),
        other => Err(Error::new(Reason::Expected {
            who: None,
            expected: "a lambda with one row parameter".to_string(),
            found: format!("{} parameters", other.len()),
        })
        .with_span(arrow.body.span)
        .into()),
    }
}

/// Lowers a `select`/`returning` selector and computes its result shape.
pub(super) fn lower_selector(
    ctx: &mut VisitorContext,
    arrow: &Arrow,
    binding: Binding,
) -> Result<(Selector, Option<Shape>)> {
    let was_in_projection = ctx.in_select_projection;
    let saw_before = ctx.saw_column_ref;
    ctx.in_select_projection = true;
    ctx.saw_column_ref = false;

    let result = lower_selector_inner(ctx, arrow, binding);

    let saw_column_ref = ctx.saw_column_ref;
    ctx.in_select_projection = was_in_projection;
    ctx.saw_column_ref = saw_before;

    let (selector, shape) = result?;

    // `select(() => 1 + 2)` and friends have no table context and no meaning.
    if !saw_column_ref && selector_is_computed(&selector) {
        return Err(Error::new_simple(
            "projection computes on literals only; reference the row parameter or \
             select plain values",
        )
        .with_span(arrow.body.span)
        .into());
    }

    Ok((selector, shape))
}

fn lower_selector_inner(
    ctx: &mut VisitorContext,
    arrow: &Arrow,
    binding: Binding,
) -> Result<(Selector, Option<Shape>)> {
    if arrow.params.len() > 1 {
        return Err(Error::new(Reason::Expected {
            who: None,
            expected: "a selector with at most one row parameter".to_string(),
            found: format!("{} parameters", arrow.params.len()),
        })
        .with_span(arrow.body.span)
        .into());
    }

    let lower_body = |ctx: &mut VisitorContext| -> Result<(Selector, Option<Shape>)> {
        match &arrow.body.kind {
            source::ExprKind::Ident(name) if arrow.params.first() == Some(name) => {
                Ok((Selector::Identity, None))
            }
            source::ExprKind::Object(entries) => {
                let (object, shape) = lower_object(ctx, entries, arrow.body.span)?;
                Ok((Selector::Object(object), Some(shape)))
            }
            _ => Ok((Selector::Value(lower_value(ctx, &arrow.body)?), None)),
        }
    };

    match arrow.params.first() {
        Some(param) => {
            let param = param.clone();
            ctx.scoped(&param, binding, lower_body)
        }
        None => lower_body(ctx),
    }
}

fn selector_is_computed(selector: &Selector) -> bool {
    match selector {
        Selector::Identity => false,
        Selector::Value(v) => v.is_computed(),
        Selector::Object(obj) => obj.entries.iter().any(|e| match e {
            ObjectEntry::Field { value, .. } => value.is_computed(),
            ObjectEntry::Spread { .. } => false,
        }),
    }
}

/// Lowers an object literal into an [ObjectExpr] plus its [Shape], expanding
/// spreads into both.
pub(super) fn lower_object(
    ctx: &mut VisitorContext,
    entries: &[source::ObjectEntry],
    span: Option<Span>,
) -> Result<(ObjectExpr, Shape)> {
    if entries.is_empty() {
        return Err(Error::new(Reason::Unsupported {
            construct: "an empty object projection".to_string(),
        })
        .with_span(span)
        .into());
    }

    let mut fields = Vec::new();
    let mut shape_entries: Vec<(String, Shape)> = Vec::new();

    for entry in entries {
        match entry {
            source::ObjectEntry::Property { name, value } => {
                if value.kind.is_object() {
                    return Err(Error::new(Reason::Unsupported {
                        construct: "nested object literals in projections".to_string(),
                    })
                    .with_span(value.span)
                    .into());
                }
                let lowered = lower_value(ctx, value)?;
                shape_entries.push((name.clone(), shape_of_value(&lowered)));
                fields.push(ObjectEntry::Field {
                    name: name.clone(),
                    value: lowered,
                });
            }
            source::ObjectEntry::Spread(expr) => {
                let resolution = lower_path(ctx, expr)?;
                let shape = match resolution {
                    Resolution::Reference(shape) => shape,
                    Resolution::Value(_) => {
                        return Err(Error::new(Reason::Unsupported {
                            construct: "spreading a scalar value".to_string(),
                        })
                        .with_span(expr.span)
                        .into())
                    }
                };
                spread_into(ctx, &shape, &mut fields, &mut shape_entries, expr.span)?;
                ctx.saw_column_ref = true;
            }
        }
    }

    Ok((ObjectExpr { entries: fields }, Shape::Object(shape_entries)))
}

/// Pre-flattens a spread source's shape into the enclosing projection, per
/// the shape-resolution rules.
fn spread_into(
    ctx: &mut VisitorContext,
    shape: &Shape,
    fields: &mut Vec<ObjectEntry>,
    shape_entries: &mut Vec<(String, Shape)>,
    span: Option<Span>,
) -> Result<()> {
    match shape {
        Shape::Reference { table } => {
            let source = if ctx.direct_columns {
                ColumnSource::Direct
            } else {
                ColumnSource::Table { index: *table }
            };
            fields.push(ObjectEntry::Spread { source });

            let table_name = ctx.table_name(*table).to_string();
            if let Some(def) = ctx.schema.table_def(&table_name) {
                for column in def.column_names() {
                    shape_entries.push((
                        column.to_string(),
                        Shape::Column {
                            column: column.to_string(),
                            table: *table,
                        },
                    ));
                }
            }
            Ok(())
        }
        Shape::Object(sub_entries) => {
            if shape.has_window_field() {
                return Err(Error::new(Reason::Unsupported {
                    construct: "spreading a result that contains window columns".to_string(),
                })
                .with_span(span)
                .into());
            }
            for (name, sub) in sub_entries {
                match sub {
                    Shape::Reference { table } => {
                        fields.push(ObjectEntry::Spread {
                            source: ColumnSource::Spread { table: *table },
                        });
                    }
                    Shape::Column { column, table } => {
                        fields.push(ObjectEntry::Field {
                            name: name.clone(),
                            value: ValueExpr::Column(Column {
                                name: column.clone(),
                                source: ColumnSource::Spread { table: *table },
                            }),
                        });
                    }
                    Shape::Computed(expr) => {
                        fields.push(ObjectEntry::Field {
                            name: name.clone(),
                            value: (**expr).clone(),
                        });
                    }
                    Shape::Object(_) | Shape::Window => {
                        return Err(Error::new(Reason::Unsupported {
                            construct: format!("spreading nested field `{name}`"),
                        })
                        .with_span(span)
                        .into())
                    }
                }
                shape_entries.push((name.clone(), sub.clone()));
            }
            Ok(())
        }
        _ => Err(Error::new(Reason::Unsupported {
            construct: "spreading a scalar value".to_string(),
        })
        .with_span(span)
        .into()),
    }
}

fn shape_of_value(value: &ValueExpr) -> Shape {
    match value {
        ValueExpr::Column(column) => match column.source.table_index() {
            Some(table) => Shape::Column {
                column: column.name.clone(),
                table,
            },
            None if column.source == ColumnSource::Direct => Shape::Column {
                column: column.name.clone(),
                table: 0,
            },
            None => Shape::Computed(Box::new(value.clone())),
        },
        ValueExpr::Window(_) => Shape::Window,
        ValueExpr::Reference(source) => Shape::Reference {
            table: source.table_index().unwrap_or(0),
        },
        other => Shape::Computed(Box::new(other.clone())),
    }
}
