//! Recognizes the `h.window(row)` builder chain inside select projections.

use anyhow::Result;

use crate::ast::expr::{SortDirection, WindowExpr, WindowFunc, WindowOrder};
use crate::ast::source::{self, Arrow};
use crate::error::{Error, Span};

use super::context::{Binding, VisitorContext};
use super::value::{expect_arg_count, expect_arrow, lower_key_selector};

/// Attempts to read `expr` as a window-builder chain. Returns `None` when the
/// chain does not start with `h.window(…)`; malformed chains that do start
/// there are hard errors.
pub(super) fn maybe_window(
    ctx: &mut VisitorContext,
    expr: &source::Expr,
) -> Option<Result<WindowExpr>> {
    let (base, calls) = unroll_calls(expr)?;
    if !ctx.is_helper(base) {
        return None;
    }
    let ((first_name, first_args, first_span), rest) = calls.split_first()?;

    if *first_name != "window" {
        return None;
    }

    Some(lower_window(ctx, (*first_args, *first_span), rest))
}

type Call<'a> = (&'a str, &'a [source::Expr], Option<Span>);

/// Unrolls a call chain into its base identifier plus base-first calls:
/// `h.window(u).partitionBy(…)` becomes `("h", [("window", …), ("partitionBy", …)])`.
fn unroll_calls(expr: &source::Expr) -> Option<(&str, Vec<Call>)> {
    let mut calls = Vec::new();
    let mut current = expr;

    loop {
        match &current.kind {
            source::ExprKind::Call { callee, args } => match &callee.kind {
                source::ExprKind::Member { object, property } => {
                    calls.push((property.as_str(), args.as_slice(), current.span));
                    current = object;
                }
                _ => return None,
            },
            source::ExprKind::Ident(_) => break,
            _ => return None,
        }
    }

    let base = current.kind.as_ident()?.as_str();
    calls.reverse();
    Some((base, calls))
}

fn lower_window(
    ctx: &mut VisitorContext,
    (window_args, window_span): (&[source::Expr], Option<Span>),
    rest: &[Call],
) -> Result<WindowExpr> {
    expect_arg_count("window", window_args, 1, window_span)?;

    let row = window_args[0].kind.as_ident().ok_or_else(|| {
        Error::new_simple("window(...) must receive the row parameter")
            .with_span(window_args[0].span)
    })?;
    let binding = ctx.binding(row).cloned().ok_or_else(|| {
        Error::new_simple(format!(
            "window(...) received `{row}`, which is not a bound row parameter"
        ))
        .with_span(window_args[0].span)
    })?;

    let mut partition_by = Vec::new();
    let mut order_by: Vec<WindowOrder> = Vec::new();
    let mut func = None;

    for (name, args, span) in rest {
        if func.is_some() {
            return Err(Error::new_simple(format!(
                "malformed window chain: `{name}` after the window function"
            ))
            .with_span(*span)
            .into());
        }
        match *name {
            "partitionBy" => {
                expect_arg_count(name, args, 1, *span)?;
                let selector = expect_arrow(&args[0], name)?;
                partition_by.push(window_key(ctx, selector, &binding)?);
            }
            "orderBy" | "orderByDescending" => {
                expect_arg_count(name, args, 1, *span)?;
                let selector = expect_arrow(&args[0], name)?;
                order_by.push(WindowOrder {
                    expr: window_key(ctx, selector, &binding)?,
                    direction: direction_of(name),
                });
            }
            "thenBy" | "thenByDescending" => {
                if order_by.is_empty() {
                    return Err(Error::new_simple(
                        "malformed window chain: thenBy requires a preceding orderBy",
                    )
                    .with_span(*span)
                    .into());
                }
                expect_arg_count(name, args, 1, *span)?;
                let selector = expect_arrow(&args[0], name)?;
                order_by.push(WindowOrder {
                    expr: window_key(ctx, selector, &binding)?,
                    direction: direction_of(name),
                });
            }
            "rowNumber" | "rank" | "denseRank" => {
                expect_arg_count(name, args, 0, *span)?;
                func = Some(match *name {
                    "rowNumber" => WindowFunc::RowNumber,
                    "rank" => WindowFunc::Rank,
                    _ => WindowFunc::DenseRank,
                });
            }
            other => {
                return Err(Error::new_simple(format!(
                    "malformed window chain: unknown method `{other}`"
                ))
                .with_span(*span)
                .into())
            }
        }
    }

    let func = func.ok_or_else(|| {
        Error::new_simple(
            "malformed window chain: missing a window function \
             (rowNumber, rank or denseRank)",
        )
        .with_span(window_span)
    })?;

    Ok(WindowExpr {
        partition_by,
        order_by,
        func,
    })
}

fn window_key(
    ctx: &mut VisitorContext,
    selector: &Arrow,
    binding: &Binding,
) -> Result<crate::ast::expr::ValueExpr> {
    lower_key_selector(ctx, selector, binding.clone())
}

fn direction_of(name: &str) -> SortDirection {
    if name.ends_with("Descending") {
        SortDirection::Desc
    } else {
        SortDirection::Asc
    }
}
