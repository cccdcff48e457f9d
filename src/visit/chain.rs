//! Walks the method-call chain of a query lambda and builds the operation
//! tree. Each chain method has a dedicated arm; chain order is preserved
//! exactly as written.

use anyhow::Result;

use crate::ast::expr::*;
use crate::ast::ops::*;
use crate::ast::shape::Shape;
use crate::ast::source::{self, Arrow, Literal};
use crate::error::{Error, Reason, Span};
use crate::params::ParamValue;

use super::context::{Binding, VisitorContext};
use super::predicate::lower_predicate;
use super::value::{
    expect_arg_count, expect_arrow, lower_key_selector, lower_object, lower_selector, lower_value,
};

pub(super) struct MethodCall<'a> {
    pub name: &'a str,
    pub args: &'a [source::Expr],
    pub span: Option<Span>,
}

/// Resolves the outer lambda into a [Query], dispatching on the root method
/// (`from`, `insertInto`, `update`, `deleteFrom`).
pub(super) fn resolve_chain(ctx: &mut VisitorContext, arrow: &Arrow) -> Result<Query> {
    let builder = arrow.params.first().cloned().ok_or_else(|| {
        Error::new(Reason::Structural(
            "the query lambda must declare the builder as its first parameter".to_string(),
        ))
        .with_span(arrow.body.span)
    })?;
    ctx.query_param = arrow.params.get(1).cloned();
    ctx.helper_param = arrow.params.get(2).cloned();

    let (base, calls) = unroll_chain(&arrow.body)?;
    if base != builder {
        return Err(Error::new(Reason::Structural(format!(
            "the query chain must start with the builder parameter `{builder}`, \
             but starts with `{base}`"
        )))
        .with_span(arrow.body.span)
        .into());
    }

    let (root, rest) = calls.split_first().expect("unroll_chain yields >= 1 call");
    log::debug!("resolving a chain rooted in `{}`", root.name);

    let kind = match root.name {
        "from" => QueryKind::Select(resolve_select_chain(ctx, root, rest)?),
        "insertInto" => QueryKind::Insert(resolve_insert_chain(ctx, root, rest)?),
        "update" => QueryKind::Update(resolve_update_chain(ctx, root, rest)?),
        "deleteFrom" => QueryKind::Delete(resolve_delete_chain(ctx, root, rest)?),
        other => {
            return Err(Error::new(Reason::NotFound {
                name: other.to_string(),
                namespace: "chain root method".to_string(),
            })
            .with_span(root.span)
            .into())
        }
    };

    Ok(Query {
        kind,
        tables: ctx.tables.clone(),
    })
}

/// Unrolls `q.from("t").where(…).take(…)` into the base identifier and the
/// call list in application order.
fn unroll_chain(expr: &source::Expr) -> Result<(String, Vec<MethodCall>)> {
    let mut calls = Vec::new();
    let mut current = expr;

    loop {
        match &current.kind {
            source::ExprKind::Call { callee, args } => match &callee.kind {
                source::ExprKind::Member { object, property } => {
                    calls.push(MethodCall {
                        name: property.as_str(),
                        args: args.as_slice(),
                        span: current.span,
                    });
                    current = object;
                }
                kind => {
                    return Err(Error::new(Reason::Structural(format!(
                        "expected a method-call chain, found a call on {}",
                        kind.name()
                    )))
                    .with_span(callee.span)
                    .into())
                }
            },
            source::ExprKind::Ident(name) => {
                if calls.is_empty() {
                    return Err(Error::new(Reason::Structural(
                        "the lambda body must be a query chain".to_string(),
                    ))
                    .with_span(expr.span)
                    .into());
                }
                calls.reverse();
                return Ok((name.clone(), calls));
            }
            kind => {
                return Err(Error::new(Reason::Structural(format!(
                    "expected a method-call chain, found {}",
                    kind.name()
                )))
                .with_span(current.span)
                .into())
            }
        }
    }
}

fn resolve_select_chain(
    ctx: &mut VisitorContext,
    root: &MethodCall,
    calls: &[MethodCall],
) -> Result<SelectQuery> {
    let table = table_arg(ctx, root)?;
    let index = ctx.intern_table(&table);

    let mut op = Operation::From(FromOp { table, index });
    let mut binding = Binding::Table { index };
    let mut pending_group: Option<(ValueExpr, Binding)> = None;
    let mut terminal: Option<Terminal> = None;

    for call in calls {
        if let Some(terminal) = &terminal {
            return Err(Error::new(Reason::Structural(format!(
                "`{}` follows the terminal operation `{}`",
                call.name,
                terminal_name(terminal)
            )))
            .with_span(call.span)
            .into());
        }
        if pending_group.is_some() && call.name != "select" {
            return Err(Error::new(Reason::Unsupported {
                construct: format!("`{}` directly after groupBy", call.name),
            })
            .with_span(call.span)
            .into());
        }

        match call.name {
            "where" => {
                expect_arg_count(call.name, call.args, 1, call.span)?;
                let arrow = expect_arrow(&call.args[0], call.name)?;
                let predicate = lower_predicate(ctx, arrow, binding.clone())?;
                op = Operation::Where {
                    source: Box::new(op),
                    predicate,
                };
            }

            "select" => {
                expect_arg_count(call.name, call.args, 1, call.span)?;
                let arrow = expect_arrow(&call.args[0], call.name)?;
                let select_binding = match pending_group.take() {
                    Some((key, element)) => Binding::Group {
                        key,
                        element: Box::new(element),
                    },
                    None => binding.clone(),
                };
                let (selector, shape) = lower_selector(ctx, arrow, select_binding)?;
                binding = match (&shape, &selector) {
                    (Some(shape), _) => Binding::Shape(shape.clone()),
                    (None, Selector::Value(value)) => {
                        Binding::Shape(Shape::Computed(Box::new(value.clone())))
                    }
                    (None, _) => binding,
                };
                op = Operation::Select {
                    source: Box::new(op),
                    selector,
                    shape,
                };
            }

            "join" | "leftJoin" => {
                let kind = if call.name == "join" {
                    JoinKind::Inner
                } else {
                    JoinKind::Left
                };
                let (join, shape) = resolve_join(ctx, op, binding.clone(), call, kind)?;
                op = Operation::Join(join);
                binding = Binding::Shape(shape);
            }

            "groupBy" => {
                expect_arg_count(call.name, call.args, 1, call.span)?;
                let arrow = expect_arrow(&call.args[0], call.name)?;
                let key = lower_key_selector(ctx, arrow, binding.clone())?;
                pending_group = Some((key.clone(), binding.clone()));
                op = Operation::GroupBy {
                    source: Box::new(op),
                    key,
                };
            }

            "orderBy" | "orderByDescending" => {
                expect_arg_count(call.name, call.args, 1, call.span)?;
                let arrow = expect_arrow(&call.args[0], call.name)?;
                let key = lower_key_selector(ctx, arrow, binding.clone())?;
                op = Operation::OrderBy {
                    source: Box::new(op),
                    key,
                    descending: call.name == "orderByDescending",
                };
            }

            "thenBy" | "thenByDescending" => {
                expect_arg_count(call.name, call.args, 1, call.span)?;
                let arrow = expect_arrow(&call.args[0], call.name)?;
                let key = lower_key_selector(ctx, arrow, binding.clone())?;
                op = Operation::ThenBy {
                    source: Box::new(op),
                    key,
                    descending: call.name == "thenByDescending",
                };
            }

            "skip" | "take" => {
                expect_arg_count(call.name, call.args, 1, call.span)?;
                let count = count_operand(ctx, &call.args[0])?;
                op = if call.name == "skip" {
                    Operation::Skip {
                        source: Box::new(op),
                        count,
                    }
                } else {
                    Operation::Take {
                        source: Box::new(op),
                        count,
                    }
                };
            }

            "distinct" => {
                expect_arg_count(call.name, call.args, 0, call.span)?;
                op = Operation::Distinct {
                    source: Box::new(op),
                };
            }

            "reverse" => {
                expect_arg_count(call.name, call.args, 0, call.span)?;
                op = Operation::Reverse {
                    source: Box::new(op),
                };
            }

            "first" | "firstOrDefault" | "single" | "singleOrDefault" | "last"
            | "lastOrDefault" => {
                let predicate = optional_predicate(ctx, call, &binding)?;
                let or_default = call.name.ends_with("OrDefault");
                terminal = Some(match &call.name[..4] {
                    "firs" => Terminal::First {
                        predicate,
                        or_default,
                    },
                    "sing" => Terminal::Single {
                        predicate,
                        or_default,
                    },
                    _ => Terminal::Last {
                        predicate,
                        or_default,
                    },
                });
            }

            "any" => {
                let predicate = optional_predicate(ctx, call, &binding)?;
                terminal = Some(Terminal::Any { predicate });
            }

            "all" => {
                expect_arg_count(call.name, call.args, 1, call.span)?;
                let arrow = expect_arrow(&call.args[0], call.name)?;
                let predicate = lower_predicate(ctx, arrow, binding.clone())?;
                terminal = Some(Terminal::All { predicate });
            }

            "contains" => {
                expect_arg_count(call.name, call.args, 1, call.span)?;
                let value = lower_value(ctx, &call.args[0])?;
                terminal = Some(Terminal::Contains { value });
            }

            "count" => {
                let predicate = optional_predicate(ctx, call, &binding)?;
                terminal = Some(Terminal::Count { predicate });
            }

            "sum" | "average" | "min" | "max" => {
                let selector = optional_selector(ctx, call, &binding)?;
                terminal = Some(match call.name {
                    "sum" => Terminal::Sum { selector },
                    "average" => Terminal::Average { selector },
                    "min" => Terminal::Min { selector },
                    _ => Terminal::Max { selector },
                });
            }

            "toArray" | "toList" => {
                expect_arg_count(call.name, call.args, 0, call.span)?;
                terminal = Some(if call.name == "toArray" {
                    Terminal::ToArray
                } else {
                    Terminal::ToList
                });
            }

            other => {
                return Err(Error::new(Reason::NotFound {
                    name: other.to_string(),
                    namespace: "chain method".to_string(),
                })
                .with_span(call.span)
                .into())
            }
        }
    }

    if pending_group.is_some() {
        return Err(Error::new(Reason::Structural(
            "groupBy(...) must be followed by select(...)".to_string(),
        ))
        .into());
    }

    Ok(SelectQuery {
        source: op,
        terminal: terminal.unwrap_or(Terminal::ToArray),
    })
}

fn resolve_join(
    ctx: &mut VisitorContext,
    outer: Operation,
    outer_binding: Binding,
    call: &MethodCall,
    kind: JoinKind,
) -> Result<(JoinOp, Shape)> {
    expect_arg_count(call.name, call.args, 4, call.span)?;

    // The inner source is a sub-chain; only a plain `from(...)` is accepted.
    let (_, inner_calls) = unroll_chain(&call.args[0])?;
    let inner_index = match inner_calls.as_slice() {
        [from] if from.name == "from" => {
            let table = table_arg(ctx, from)?;
            ctx.intern_table(&table)
        }
        _ => {
            return Err(Error::new(Reason::Unsupported {
                construct: "a join inner source other than a plain from(...)".to_string(),
            })
            .with_span(call.args[0].span)
            .into())
        }
    };
    let inner_table = ctx.table_name(inner_index).to_string();

    let outer_key = join_key(ctx, &call.args[1], outer_binding.clone(), 0)?;
    let inner_key = join_key(ctx, &call.args[2], Binding::Table { index: inner_index }, 1)?;

    let result = expect_arrow(&call.args[3], call.name)?;
    let [outer_param, inner_param] = result.params.as_slice() else {
        return Err(Error::new(Reason::Expected {
            who: Some(format!("`{}`", call.name)),
            expected: "a result selector with two parameters".to_string(),
            found: format!("{} parameters", result.params.len()),
        })
        .with_span(result.body.span)
        .into());
    };

    let entries = match &result.body.kind {
        source::ExprKind::Object(entries) => entries,
        kind => {
            return Err(Error::new(Reason::Expected {
                who: Some(format!("`{}`", call.name)),
                expected: "an object result selector".to_string(),
                found: kind.name().to_string(),
            })
            .with_span(result.body.span)
            .into())
        }
    };

    let span = result.body.span;
    let (outer_param, inner_param) = (outer_param.clone(), inner_param.clone());
    let (selector, shape) = ctx.scoped2(
        (&outer_param, outer_binding),
        (&inner_param, Binding::Table { index: inner_index }),
        |ctx| lower_object(ctx, entries, span),
    )?;

    let inner = Operation::From(FromOp {
        table: inner_table,
        index: inner_index,
    });

    Ok((
        JoinOp {
            source: Box::new(outer),
            inner: Box::new(inner),
            outer_key,
            inner_key,
            selector,
            shape: shape.clone(),
            kind,
        },
        shape,
    ))
}

/// Join keys are single-column references; the resolved column is re-tagged
/// as a join parameter of the given position.
fn join_key(
    ctx: &mut VisitorContext,
    expr: &source::Expr,
    binding: Binding,
    position: u8,
) -> Result<ValueExpr> {
    let arrow = expect_arrow(expr, "join key")?;
    let key = lower_key_selector(ctx, arrow, binding)?;
    match key {
        ValueExpr::Column(column) => {
            let source = match column.source.table_index() {
                Some(table) => ColumnSource::JoinParam { position, table },
                None => column.source,
            };
            Ok(ValueExpr::Column(Column {
                name: column.name,
                source,
            }))
        }
        _ => Err(Error::new(Reason::Unsupported {
            construct: "a join key that is not a single column".to_string(),
        })
        .with_span(arrow.body.span)
        .into()),
    }
}

fn resolve_insert_chain(
    ctx: &mut VisitorContext,
    root: &MethodCall,
    calls: &[MethodCall],
) -> Result<InsertStatement> {
    let table = table_arg(ctx, root)?;
    ctx.intern_table(&table);
    ctx.direct_columns = true;

    let mut values: Option<ObjectExpr> = None;
    let mut returning: Option<Selector> = None;

    for call in calls {
        match call.name {
            "values" => {
                expect_arg_count(call.name, call.args, 1, call.span)?;
                let entries = object_arg(&call.args[0], call.name)?;
                let (object, _) = lower_object(ctx, entries, call.args[0].span)?;
                validate_assignment_columns(ctx, &object, &table, call.span)?;
                values = Some(object);
            }
            "returning" => {
                returning = Some(returning_selector(ctx, call)?);
            }
            other => {
                return Err(Error::new(Reason::NotFound {
                    name: other.to_string(),
                    namespace: "insert chain method".to_string(),
                })
                .with_span(call.span)
                .into())
            }
        }
    }

    let values = values.ok_or_else(|| {
        Error::new(Reason::Structural(
            "INSERT requires values(...) before generating SQL".to_string(),
        ))
    })?;

    Ok(InsertStatement {
        table,
        values,
        returning,
    })
}

fn resolve_update_chain(
    ctx: &mut VisitorContext,
    root: &MethodCall,
    calls: &[MethodCall],
) -> Result<UpdateStatement> {
    let table = table_arg(ctx, root)?;
    let index = ctx.intern_table(&table);
    ctx.direct_columns = true;

    let mut assignments: Option<ObjectExpr> = None;
    let mut predicate: Option<BoolExpr> = None;
    let mut allow_full_table = false;
    let mut returning: Option<Selector> = None;

    for call in calls {
        match call.name {
            "set" => {
                expect_arg_count(call.name, call.args, 1, call.span)?;
                let object = set_payload(ctx, &call.args[0], index)?;
                validate_assignment_columns(ctx, &object, &table, call.span)?;
                assignments = Some(object);
            }
            "where" => {
                expect_arg_count(call.name, call.args, 1, call.span)?;
                let arrow = expect_arrow(&call.args[0], call.name)?;
                let new = lower_predicate(ctx, arrow, Binding::Table { index })?;
                predicate = Some(match predicate.take() {
                    Some(prev) => BoolExpr::Logical {
                        op: LogicalOp::And,
                        left: Box::new(prev),
                        right: Box::new(new),
                    },
                    None => new,
                });
            }
            "allowFullTableUpdate" => {
                expect_arg_count(call.name, call.args, 0, call.span)?;
                allow_full_table = true;
            }
            "returning" => {
                returning = Some(returning_selector(ctx, call)?);
            }
            other => {
                return Err(Error::new(Reason::NotFound {
                    name: other.to_string(),
                    namespace: "update chain method".to_string(),
                })
                .with_span(call.span)
                .into())
            }
        }
    }

    let assignments = assignments.ok_or_else(|| {
        Error::new(Reason::Structural(
            "UPDATE requires set() before generating SQL".to_string(),
        ))
    })?;

    Ok(UpdateStatement {
        table,
        assignments,
        predicate,
        allow_full_table,
        returning,
    })
}

fn resolve_delete_chain(
    ctx: &mut VisitorContext,
    root: &MethodCall,
    calls: &[MethodCall],
) -> Result<DeleteStatement> {
    let table = table_arg(ctx, root)?;
    let index = ctx.intern_table(&table);
    ctx.direct_columns = true;

    let mut predicate: Option<BoolExpr> = None;
    let mut allow_full_table = false;
    let mut returning: Option<Selector> = None;

    for call in calls {
        match call.name {
            "where" => {
                expect_arg_count(call.name, call.args, 1, call.span)?;
                let arrow = expect_arrow(&call.args[0], call.name)?;
                let new = lower_predicate(ctx, arrow, Binding::Table { index })?;
                predicate = Some(match predicate.take() {
                    Some(prev) => BoolExpr::Logical {
                        op: LogicalOp::And,
                        left: Box::new(prev),
                        right: Box::new(new),
                    },
                    None => new,
                });
            }
            "allowFullTableDelete" => {
                expect_arg_count(call.name, call.args, 0, call.span)?;
                allow_full_table = true;
            }
            "returning" => {
                returning = Some(returning_selector(ctx, call)?);
            }
            other => {
                return Err(Error::new(Reason::NotFound {
                    name: other.to_string(),
                    namespace: "delete chain method".to_string(),
                })
                .with_span(call.span)
                .into())
            }
        }
    }

    Ok(DeleteStatement {
        table,
        predicate,
        allow_full_table,
        returning,
    })
}

/// `set` accepts a bare object literal or a lambda over the row (for
/// computed assignments like `{ views: u.views + 1 }`).
fn set_payload(
    ctx: &mut VisitorContext,
    arg: &source::Expr,
    table_index: usize,
) -> Result<ObjectExpr> {
    match &arg.kind {
        source::ExprKind::Object(entries) => {
            Ok(lower_object(ctx, entries, arg.span)?.0)
        }
        source::ExprKind::Arrow(arrow) => {
            let entries = object_arg(&arrow.body, "set")?;
            let span = arrow.body.span;
            match arrow.params.as_slice() {
                [] => Ok(lower_object(ctx, entries, span)?.0),
                [row] => {
                    let row = row.clone();
                    ctx.scoped(&row, Binding::Table { index: table_index }, |ctx| {
                        Ok(lower_object(ctx, entries, span)?.0)
                    })
                }
                other => Err(Error::new(Reason::Expected {
                    who: Some("`set`".to_string()),
                    expected: "a lambda with at most one row parameter".to_string(),
                    found: format!("{} parameters", other.len()),
                })
                .with_span(span)
                .into()),
            }
        }
        kind => Err(Error::new(Reason::Expected {
            who: Some("`set`".to_string()),
            expected: "an object of assignments".to_string(),
            found: kind.name().to_string(),
        })
        .with_span(arg.span)
        .into()),
    }
}

fn returning_selector(ctx: &mut VisitorContext, call: &MethodCall) -> Result<Selector> {
    expect_arg_count(call.name, call.args, 1, call.span)?;
    let arrow = expect_arrow(&call.args[0], call.name)?;
    let (selector, _) = lower_selector(ctx, arrow, Binding::Table { index: 0 })?;
    Ok(selector)
}

/// Mutation payload keys are column names; check them against the schema.
fn validate_assignment_columns(
    ctx: &VisitorContext,
    object: &ObjectExpr,
    table: &str,
    span: Option<Span>,
) -> Result<()> {
    let def = ctx.schema.table_def(table).expect("table checked at root");
    for entry in &object.entries {
        match entry {
            ObjectEntry::Field { name, .. } => {
                if def.column(name).is_none() {
                    return Err(Error::new(Reason::NotFound {
                        name: name.clone(),
                        namespace: format!("column of table `{table}`"),
                    })
                    .with_span(span)
                    .into());
                }
            }
            ObjectEntry::Spread { .. } => {
                return Err(Error::new(Reason::Unsupported {
                    construct: "spread in a mutation payload".to_string(),
                })
                .with_span(span)
                .into())
            }
        }
    }
    Ok(())
}

fn object_arg<'a>(expr: &'a source::Expr, who: &str) -> Result<&'a [source::ObjectEntry]> {
    match &expr.kind {
        source::ExprKind::Object(entries) => Ok(entries.as_slice()),
        kind => Err(Error::new(Reason::Expected {
            who: Some(format!("`{who}`")),
            expected: "an object literal".to_string(),
            found: kind.name().to_string(),
        })
        .with_span(expr.span)
        .into()),
    }
}

fn table_arg(ctx: &VisitorContext, call: &MethodCall) -> Result<String> {
    expect_arg_count(call.name, call.args, 1, call.span)?;
    let table = match &call.args[0].kind {
        source::ExprKind::Literal(Literal::String(s)) => s.clone(),
        kind => {
            return Err(Error::new(Reason::Expected {
                who: Some(format!("`{}`", call.name)),
                expected: "a table name string".to_string(),
                found: kind.name().to_string(),
            })
            .with_span(call.args[0].span)
            .into())
        }
    };
    if ctx.schema.table_def(&table).is_none() {
        return Err(Error::new(Reason::NotFound {
            name: table,
            namespace: "table".to_string(),
        })
        .with_span(call.args[0].span)
        .into());
    }
    Ok(table)
}

fn optional_predicate(
    ctx: &mut VisitorContext,
    call: &MethodCall,
    binding: &Binding,
) -> Result<Option<BoolExpr>> {
    match call.args.len() {
        0 => Ok(None),
        1 => {
            let arrow = expect_arrow(&call.args[0], call.name)?;
            Ok(Some(lower_predicate(ctx, arrow, binding.clone())?))
        }
        n => Err(Error::new(Reason::Expected {
            who: Some(format!("`{}`", call.name)),
            expected: "at most one predicate argument".to_string(),
            found: format!("{n} arguments"),
        })
        .with_span(call.span)
        .into()),
    }
}

fn optional_selector(
    ctx: &mut VisitorContext,
    call: &MethodCall,
    binding: &Binding,
) -> Result<Option<ValueExpr>> {
    match call.args.len() {
        0 => Ok(None),
        1 => {
            let arrow = expect_arrow(&call.args[0], call.name)?;
            Ok(Some(lower_key_selector(ctx, arrow, binding.clone())?))
        }
        n => Err(Error::new(Reason::Expected {
            who: Some(format!("`{}`", call.name)),
            expected: "at most one selector argument".to_string(),
            found: format!("{n} arguments"),
        })
        .with_span(call.span)
        .into()),
    }
}

fn count_operand(ctx: &mut VisitorContext, expr: &source::Expr) -> Result<CountOperand> {
    match &expr.kind {
        source::ExprKind::Literal(Literal::Integer(n)) => {
            let name = ctx.fresh_param(ParamValue::Int(*n));
            Ok(CountOperand::Param(ParamRef::new(name)))
        }
        _ => match lower_value(ctx, expr)? {
            ValueExpr::Param(param) => Ok(CountOperand::Param(param)),
            _ => Err(Error::new(Reason::Expected {
                who: Some("`take`/`skip`".to_string()),
                expected: "a number or a parameter reference".to_string(),
                found: expr.kind.name().to_string(),
            })
            .with_span(expr.span)
            .into()),
        },
    }
}

fn terminal_name(terminal: &Terminal) -> &'static str {
    match terminal {
        Terminal::ToArray => "toArray",
        Terminal::ToList => "toList",
        Terminal::First { .. } => "first",
        Terminal::Single { .. } => "single",
        Terminal::Last { .. } => "last",
        Terminal::Any { .. } => "any",
        Terminal::All { .. } => "all",
        Terminal::Contains { .. } => "contains",
        Terminal::Count { .. } => "count",
        Terminal::Sum { .. } => "sum",
        Terminal::Average { .. } => "average",
        Terminal::Min { .. } => "min",
        Terminal::Max { .. } => "max",
    }
}
