//! Lowers source expressions into [BoolExpr], normalizing null comparisons
//! into `IS NULL` checks as it goes.

use anyhow::Result;

use crate::ast::expr::*;
use crate::ast::source::{self, Arrow, BinOp, Literal, UnOp};
use crate::error::{Error, Reason, Span};
use crate::schema::ColumnType;

use super::context::{Binding, VisitorContext};
use super::shape::Resolution;
use super::value::{
    expect_arg_count, lower_path, lower_value, lowered_column_type, member_path, single_param,
};

/// Lowers a predicate lambda (`where`, terminal predicates), binding its row
/// parameter.
pub(super) fn lower_predicate(
    ctx: &mut VisitorContext,
    arrow: &Arrow,
    binding: Binding,
) -> Result<BoolExpr> {
    let param = single_param(arrow)?;
    ctx.scoped(&param, binding, |ctx| lower_bool(ctx, &arrow.body))
}

pub(super) fn lower_bool(ctx: &mut VisitorContext, expr: &source::Expr) -> Result<BoolExpr> {
    let span = expr.span;
    match &expr.kind {
        source::ExprKind::Binary { left, op, right } if op.is_comparison() => {
            lower_comparison(ctx, left, *op, right, span)
        }

        source::ExprKind::Binary { left, op, right }
            if matches!(op, BinOp::And | BinOp::Or) =>
        {
            let op = match op {
                BinOp::And => LogicalOp::And,
                _ => LogicalOp::Or,
            };
            let left = Box::new(lower_bool(ctx, left)?);
            let right = Box::new(lower_bool(ctx, right)?);
            Ok(BoolExpr::Logical { op, left, right })
        }

        source::ExprKind::Binary { op, .. } => Err(Error::new(Reason::Unsupported {
            construct: format!("operator `{op}` in a predicate"),
        })
        .with_span(span)
        .into()),

        source::ExprKind::Unary { op: UnOp::Not, expr } => {
            Ok(BoolExpr::Not(Box::new(lower_bool(ctx, expr)?)))
        }

        source::ExprKind::Unary { .. } => Err(Error::new(Reason::Unsupported {
            construct: "unary minus in a predicate".to_string(),
        })
        .with_span(span)
        .into()),

        source::ExprKind::Literal(Literal::Boolean(b)) => {
            let name = ctx.fresh_param(crate::params::ParamValue::Bool(*b));
            Ok(BoolExpr::Param(ParamRef::new(name)))
        }

        source::ExprKind::Literal(lit) => Err(Error::new(Reason::Expected {
            who: None,
            expected: "a boolean expression".to_string(),
            found: format!("literal {lit}"),
        })
        .with_span(span)
        .into()),

        source::ExprKind::Ident(_) | source::ExprKind::Member { .. } => {
            lower_bool_path(ctx, expr, span)
        }

        source::ExprKind::Call { callee, args } => lower_bool_call(ctx, callee, args, span),

        source::ExprKind::Conditional { .. } => Err(Error::new(Reason::Unsupported {
            construct: "a conditional expression as a predicate".to_string(),
        })
        .with_span(span)
        .into()),

        source::ExprKind::Index { .. } => Err(Error::new(Reason::Unsupported {
            construct: "computed member access".to_string(),
        })
        .with_span(span)
        .into()),

        kind => Err(Error::new(Reason::Unsupported {
            construct: format!("{} in a predicate", kind.name()),
        })
        .with_span(span)
        .into()),
    }
}

fn lower_comparison(
    ctx: &mut VisitorContext,
    left: &source::Expr,
    op: BinOp,
    right: &source::Expr,
    span: Option<Span>,
) -> Result<BoolExpr> {
    let left_null = is_nullish(left);
    let right_null = is_nullish(right);

    // Equality against the null literal becomes a structural null check,
    // symmetric in both operands. This also covers the optional-filter
    // pattern of a parameter compared to `undefined`.
    if left_null || right_null {
        if left_null && right_null {
            return Err(Error::new(Reason::Unsupported {
                construct: "comparing null with null".to_string(),
            })
            .with_span(span)
            .into());
        }
        if !matches!(op, BinOp::Eq | BinOp::Ne) {
            return Err(Error::new(Reason::Unsupported {
                construct: format!("ordering comparison `{op}` against null"),
            })
            .with_span(span)
            .into());
        }
        let operand = lower_value(ctx, if left_null { right } else { left })?;
        return Ok(BoolExpr::IsNull {
            expr: Box::new(operand),
            negated: op == BinOp::Ne,
        });
    }

    let lowered_left = lower_value(ctx, left)?;
    let lowered_right = lower_value(ctx, right)?;

    annotate_comparison(ctx, left, &lowered_left, right, &lowered_right);

    let op = match op {
        BinOp::Eq => CompareOp::Eq,
        BinOp::Ne => CompareOp::Ne,
        BinOp::Gt => CompareOp::Gt,
        BinOp::Gte => CompareOp::Gte,
        BinOp::Lt => CompareOp::Lt,
        BinOp::Lte => CompareOp::Lte,
        _ => unreachable!("checked comparison operator"),
    };

    Ok(BoolExpr::Comparison {
        op,
        left: Box::new(lowered_left),
        right: Box::new(lowered_right),
    })
}

/// When one side of a comparison is a lifted literal and the other a column,
/// record the column as the parameter's context.
fn annotate_comparison(
    ctx: &mut VisitorContext,
    left_src: &source::Expr,
    left: &ValueExpr,
    right_src: &source::Expr,
    right: &ValueExpr,
) {
    let pairs = [(left_src, left, right), (right_src, right, left)];
    for (src, lowered, other) in pairs {
        if !src.kind.is_literal() {
            continue;
        }
        let (ValueExpr::Param(param), ValueExpr::Column(column)) = (lowered, other) else {
            continue;
        };
        let table_index = match column.source {
            ColumnSource::Direct => Some(0),
            other => other.table_index(),
        };
        let name = param.name.clone();
        ctx.annotate_param(&name, &column.name, table_index);
    }
}

fn is_nullish(expr: &source::Expr) -> bool {
    matches!(&expr.kind, source::ExprKind::Literal(lit) if lit.is_nullish())
}

fn lower_bool_path(
    ctx: &mut VisitorContext,
    expr: &source::Expr,
    span: Option<Span>,
) -> Result<BoolExpr> {
    match lower_path(ctx, expr)? {
        Resolution::Value(ValueExpr::Column(column)) => {
            if lowered_column_type(ctx, &column) == Some(ColumnType::Bool) {
                Ok(BoolExpr::Column(column))
            } else {
                Err(Error::new(Reason::Expected {
                    who: None,
                    expected: "a boolean expression".to_string(),
                    found: format!("column `{}`, which is not boolean", column.name),
                })
                .with_span(span)
                .into())
            }
        }
        Resolution::Value(ValueExpr::Param(param)) => Ok(BoolExpr::Param(param)),
        Resolution::Value(ValueExpr::Bool(inner)) => Ok(*inner),
        Resolution::Value(_) => Err(Error::new(Reason::Expected {
            who: None,
            expected: "a boolean expression".to_string(),
            found: "a non-boolean value".to_string(),
        })
        .with_span(span)
        .into()),
        Resolution::Reference(_) => Err(Error::new(Reason::Expected {
            who: None,
            expected: "a boolean expression".to_string(),
            found: "a whole-row reference".to_string(),
        })
        .with_span(span)
        .into()),
    }
}

fn lower_bool_call(
    ctx: &mut VisitorContext,
    callee: &source::Expr,
    args: &[source::Expr],
    span: Option<Span>,
) -> Result<BoolExpr> {
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

    // `h.functions.iequals(a, b)` and friends.
    if let Some(func) = case_insensitive_func(ctx, object, method) {
        expect_arg_count(method, args, 2, span)?;
        let left = Box::new(lower_value(ctx, &args[0])?);
        let right = Box::new(lower_value(ctx, &args[1])?);
        return Ok(BoolExpr::CaseInsensitive { func, left, right });
    }

    match method {
        "startsWith" | "endsWith" => {
            expect_arg_count(method, args, 1, span)?;
            let lowered = Box::new(lower_value(ctx, object)?);
            let arg = Box::new(lower_value(ctx, &args[0])?);
            let method = if method == "startsWith" {
                BoolMethod::StartsWith
            } else {
                BoolMethod::EndsWith
            };
            Ok(BoolExpr::Method {
                object: lowered,
                method,
                arg,
            })
        }

        // Membership when the receiver is a list (array literal or external
        // parameter); substring search when it is a string expression.
        "includes" | "contains" => {
            expect_arg_count(method, args, 1, span)?;
            if let source::ExprKind::Array(items) = &object.kind {
                let list = items
                    .iter()
                    .map(|item| lower_value(ctx, item))
                    .collect::<Result<Vec<_>>>()?;
                let value = Box::new(lower_value(ctx, &args[0])?);
                return Ok(BoolExpr::In {
                    value,
                    list: InList::Values(list),
                });
            }
            if let Some(param) = query_param_ref(ctx, object) {
                let value = Box::new(lower_value(ctx, &args[0])?);
                return Ok(BoolExpr::In {
                    value,
                    list: InList::Param(param),
                });
            }
            let lowered = Box::new(lower_value(ctx, object)?);
            let arg = Box::new(lower_value(ctx, &args[0])?);
            Ok(BoolExpr::Method {
                object: lowered,
                method: BoolMethod::Contains,
                arg,
            })
        }

        _ => Err(Error::new(Reason::NotFound {
            name: method.to_string(),
            namespace: "method".to_string(),
        })
        .with_span(span)
        .into()),
    }
}

fn case_insensitive_func(
    ctx: &VisitorContext,
    object: &source::Expr,
    method: &str,
) -> Option<CiFunc> {
    let (base, path) = member_path(object)?;
    if !ctx.is_helper(&base) || path != ["functions"] {
        return None;
    }
    match method {
        "iequals" => Some(CiFunc::IEquals),
        "istartsWith" => Some(CiFunc::IStartsWith),
        "iendsWith" => Some(CiFunc::IEndsWith),
        "icontains" => Some(CiFunc::IContains),
        _ => None,
    }
}

fn query_param_ref(ctx: &VisitorContext, expr: &source::Expr) -> Option<ParamRef> {
    let (base, path) = member_path(expr)?;
    if !ctx.is_query_param(&base) || path.is_empty() {
        return None;
    }
    let property = if path.len() > 1 {
        Some(path[1..].join("."))
    } else {
        None
    };
    Some(ParamRef {
        name: path[0].clone(),
        property,
    })
}
