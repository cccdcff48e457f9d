//! Renders expression IR into SQL fragments.
//!
//! Parenthesization policy: arithmetic nests by binding strength, logical
//! nodes flatten same-operator chains and always render inside one pair of
//! parentheses, and comparisons render bare. Two source phrasings of the
//! same tree therefore produce identical SQL.

use anyhow::Result;
use itertools::Itertools;

use crate::ast::expr::*;

use super::context::Context;
use super::dialect::DialectHandler as _;

pub(super) fn write_value(expr: &ValueExpr, ctx: &mut Context) -> Result<String> {
    Ok(match expr {
        ValueExpr::Column(column) => ctx.column(column)?,

        ValueExpr::Constant(constant) => write_constant(constant, ctx),

        ValueExpr::Param(param) => ctx.placeholder(param),

        ValueExpr::Arithmetic { op, left, right } => {
            let strength = arith_strength(*op);
            let fix_right = matches!(op, ArithOp::Sub | ArithOp::Div | ArithOp::Mod);
            let left = write_operand(left, strength, false, ctx)?;
            let right = write_operand(right, strength, fix_right, ctx)?;
            let op = match op {
                ArithOp::Add => "+",
                ArithOp::Sub => "-",
                ArithOp::Mul => "*",
                ArithOp::Div => "/",
                ArithOp::Mod => "%",
            };
            format!("{left} {op} {right}")
        }

        ValueExpr::Concat { .. } => {
            let mut args = Vec::new();
            collect_concat(expr, &mut args);
            if ctx.dialect.has_concat_function() {
                let args: Vec<_> = args
                    .into_iter()
                    .map(|a| write_value(a, ctx))
                    .try_collect()?;
                format!("CONCAT({})", args.join(", "))
            } else {
                let args: Vec<_> = args
                    .into_iter()
                    .map(|a| write_operand(a, CONCAT_STRENGTH, false, ctx))
                    .try_collect()?;
                args.join(" || ")
            }
        }

        ValueExpr::StringMethod { object, method } => {
            let func = match method {
                StringMethod::ToLower => "LOWER",
                StringMethod::ToUpper => "UPPER",
            };
            format!("{func}({})", write_value(object, ctx)?)
        }

        ValueExpr::Coalesce(exprs) => {
            let args: Vec<_> = exprs.iter().map(|e| write_value(e, ctx)).try_collect()?;
            format!("COALESCE({})", args.join(", "))
        }

        ValueExpr::Conditional {
            condition,
            then,
            otherwise,
        } => format!(
            "CASE WHEN {} THEN {} ELSE {} END",
            write_bool(condition, ctx)?,
            write_value(then, ctx)?,
            write_value(otherwise, ctx)?
        ),

        ValueExpr::Aggregate { func, expr } => {
            let name = match func {
                AggregateFunc::Count => "COUNT",
                AggregateFunc::Sum => "SUM",
                AggregateFunc::Avg => "AVG",
                AggregateFunc::Min => "MIN",
                AggregateFunc::Max => "MAX",
            };
            match expr {
                Some(expr) => format!("{name}({})", write_value(expr, ctx)?),
                None => format!("{name}(*)"),
            }
        }

        ValueExpr::Reference(source) => match source.table_index() {
            Some(index) if ctx.qualify => format!("{}.*", ctx.quote(&ctx.alias(index))?),
            _ => "*".to_string(),
        },

        ValueExpr::Window(window) => write_window(window, ctx)?,

        ValueExpr::Bool(inner) => write_bool(inner, ctx)?,
    })
}

pub(super) fn write_bool(expr: &BoolExpr, ctx: &mut Context) -> Result<String> {
    Ok(match expr {
        BoolExpr::Comparison { op, left, right } => {
            let left = write_operand(left, COMPARISON_STRENGTH, false, ctx)?;
            let right = write_operand(right, COMPARISON_STRENGTH, false, ctx)?;
            let op = match op {
                CompareOp::Eq => "=",
                CompareOp::Ne => "<>",
                CompareOp::Gt => ">",
                CompareOp::Gte => ">=",
                CompareOp::Lt => "<",
                CompareOp::Lte => "<=",
            };
            format!("{left} {op} {right}")
        }

        BoolExpr::Logical { op, .. } => {
            let mut operands = Vec::new();
            collect_logical(expr, *op, &mut operands);
            let parts: Vec<_> = operands
                .into_iter()
                .map(|o| write_bool(o, ctx))
                .try_collect()?;
            let sep = match op {
                LogicalOp::And => " AND ",
                LogicalOp::Or => " OR ",
            };
            format!("({})", parts.join(sep))
        }

        BoolExpr::Not(inner) => {
            let rendered = write_bool(inner, ctx)?;
            match inner.as_ref() {
                // Logical operands carry their own parentheses.
                BoolExpr::Logical { .. }
                | BoolExpr::Column(_)
                | BoolExpr::Param(_)
                | BoolExpr::Constant(_) => format!("NOT {rendered}"),
                _ => format!("NOT ({rendered})"),
            }
        }

        BoolExpr::Constant(value) => ctx.dialect.boolean_keyword(*value).to_string(),

        BoolExpr::Column(column) => ctx.column(column)?,

        BoolExpr::Param(param) => ctx.placeholder(param),

        BoolExpr::Method {
            object,
            method,
            arg,
        } => {
            let object = write_operand(object, LIKE_STRENGTH, false, ctx)?;
            let arg = write_value(arg, ctx)?;
            let pattern = like_pattern(ctx, &arg, *method);
            format!("{object} LIKE {pattern}")
        }

        BoolExpr::In { value, list } => {
            let value = write_operand(value, LIKE_STRENGTH, false, ctx)?;
            let list = match list {
                InList::Values(items) => {
                    let items: Vec<_> =
                        items.iter().map(|i| write_value(i, ctx)).try_collect()?;
                    items.join(", ")
                }
                InList::Param(param) => ctx.placeholder(param),
            };
            format!("{value} IN ({list})")
        }

        BoolExpr::IsNull { expr, negated } => {
            let operand = write_operand(expr, IS_NULL_STRENGTH, false, ctx)?;
            if *negated {
                format!("{operand} IS NOT NULL")
            } else {
                format!("{operand} IS NULL")
            }
        }

        BoolExpr::CaseInsensitive { func, left, right } => {
            let left = format!("LOWER({})", write_value(left, ctx)?);
            let right = format!("LOWER({})", write_value(right, ctx)?);
            match func {
                CiFunc::IEquals => format!("{left} = {right}"),
                CiFunc::IStartsWith => {
                    format!("{left} LIKE {}", like_pattern(ctx, &right, BoolMethod::StartsWith))
                }
                CiFunc::IEndsWith => {
                    format!("{left} LIKE {}", like_pattern(ctx, &right, BoolMethod::EndsWith))
                }
                CiFunc::IContains => {
                    format!("{left} LIKE {}", like_pattern(ctx, &right, BoolMethod::Contains))
                }
            }
        }
    })
}

/// A LIKE pattern built around `arg`, concatenated with the dialect's native
/// operator.
fn like_pattern(ctx: &Context, arg: &str, method: BoolMethod) -> String {
    if ctx.dialect.has_concat_function() {
        match method {
            BoolMethod::StartsWith => format!("CONCAT({arg}, '%')"),
            BoolMethod::EndsWith => format!("CONCAT('%', {arg})"),
            BoolMethod::Contains => format!("CONCAT('%', {arg}, '%')"),
        }
    } else {
        match method {
            BoolMethod::StartsWith => format!("{arg} || '%'"),
            BoolMethod::EndsWith => format!("'%' || {arg}"),
            BoolMethod::Contains => format!("'%' || {arg} || '%'"),
        }
    }
}

fn write_window(window: &WindowExpr, ctx: &mut Context) -> Result<String> {
    let func = match window.func {
        WindowFunc::RowNumber => "ROW_NUMBER",
        WindowFunc::Rank => "RANK",
        WindowFunc::DenseRank => "DENSE_RANK",
    };

    let mut over = Vec::new();
    if !window.partition_by.is_empty() {
        let keys: Vec<_> = window
            .partition_by
            .iter()
            .map(|k| write_value(k, ctx))
            .try_collect()?;
        over.push(format!("PARTITION BY {}", keys.join(", ")));
    }
    if !window.order_by.is_empty() {
        let keys: Vec<_> = window
            .order_by
            .iter()
            .map(|o| {
                let direction = match o.direction {
                    SortDirection::Asc => "ASC",
                    SortDirection::Desc => "DESC",
                };
                write_value(&o.expr, ctx).map(|e| format!("{e} {direction}"))
            })
            .try_collect()?;
        over.push(format!("ORDER BY {}", keys.join(", ")));
    }

    Ok(format!("{func}() OVER ({})", over.join(" ")))
}

fn write_constant(constant: &Constant, ctx: &Context) -> String {
    match constant {
        Constant::Null => "NULL".to_string(),
        Constant::Bool(b) => ctx.dialect.boolean_keyword(*b).to_string(),
        Constant::Int(i) => i.to_string(),
        Constant::Float(f) => f.to_string(),
        Constant::String(s) => format!("'{}'", s.replace('\'', "''")),
    }
}

fn collect_concat<'a>(expr: &'a ValueExpr, out: &mut Vec<&'a ValueExpr>) {
    match expr {
        ValueExpr::Concat { left, right } => {
            collect_concat(left, out);
            collect_concat(right, out);
        }
        _ => out.push(expr),
    }
}

fn collect_logical<'a>(expr: &'a BoolExpr, op: LogicalOp, out: &mut Vec<&'a BoolExpr>) {
    match expr {
        BoolExpr::Logical {
            op: inner_op,
            left,
            right,
        } if *inner_op == op => {
            collect_logical(left, op, out);
            collect_logical(right, op, out);
        }
        _ => out.push(expr),
    }
}

// Binding strengths, after the PostgreSQL operator table. All other value
// forms are atoms (function calls, placeholders, CASE … END).
const ATOM_STRENGTH: i32 = 20;
const MUL_STRENGTH: i32 = 11;
const ADD_STRENGTH: i32 = 10;
const CONCAT_STRENGTH: i32 = 9;
const LIKE_STRENGTH: i32 = 7;
const COMPARISON_STRENGTH: i32 = 6;
const IS_NULL_STRENGTH: i32 = 5;

fn arith_strength(op: ArithOp) -> i32 {
    match op {
        ArithOp::Mul | ArithOp::Div | ArithOp::Mod => MUL_STRENGTH,
        ArithOp::Add | ArithOp::Sub => ADD_STRENGTH,
    }
}

fn value_strength(expr: &ValueExpr) -> i32 {
    match expr {
        ValueExpr::Arithmetic { op, .. } => arith_strength(*op),
        ValueExpr::Concat { .. } => CONCAT_STRENGTH,
        ValueExpr::Bool(inner) => bool_strength(inner),
        _ => ATOM_STRENGTH,
    }
}

fn bool_strength(expr: &BoolExpr) -> i32 {
    match expr {
        BoolExpr::Comparison { .. } | BoolExpr::CaseInsensitive { .. } => COMPARISON_STRENGTH,
        BoolExpr::Method { .. } | BoolExpr::In { .. } => LIKE_STRENGTH,
        BoolExpr::IsNull { .. } => IS_NULL_STRENGTH,
        // Logical and Not render self-delimited.
        _ => ATOM_STRENGTH,
    }
}

/// Wraps into parentheses if binding strength would be less than the parent's.
fn write_operand(
    expr: &ValueExpr,
    parent_strength: i32,
    fix_associativity: bool,
    ctx: &mut Context,
) -> Result<String> {
    let rendered = write_value(expr, ctx)?;
    let strength = value_strength(expr);

    let needs_nesting =
        strength < parent_strength || (strength == parent_strength && fix_associativity);

    Ok(if needs_nesting {
        format!("({rendered})")
    } else {
        rendered
    })
}
