//! Flattens the operation tree into clauses and assembles the final
//! statement, including terminal lowering and window-subquery nesting.

use anyhow::Result;
use itertools::Itertools;

use crate::ast::expr::*;
use crate::ast::ops::*;
use crate::error::{Error, Reason};
use crate::params::Params;

use super::context::Context;
use super::dialect::DialectHandler as _;
use super::gen_expr::{write_bool, write_value};
use super::{Dialect, Statement};

pub(crate) fn compile(
    query: &Query,
    auto_params: &Params,
    runtime_params: &Params,
    dialect: Dialect,
) -> Result<Statement> {
    for name in runtime_params.names() {
        if name.starts_with("__p") {
            return Err(Error::new(Reason::Guard(format!(
                "runtime parameter `{name}` uses the reserved `__p` prefix"
            )))
            .into());
        }
    }
    let params = auto_params.merged_with(runtime_params);

    let mut ctx = Context::new(dialect, query.tables.clone());
    log::debug!("emitting a statement over tables {:?}", query.tables);

    let sql = match &query.kind {
        QueryKind::Select(select) => gen_select(select, &mut ctx)?,
        QueryKind::Insert(insert) => gen_insert(insert, &mut ctx)?,
        QueryKind::Update(update) => gen_update(update, &mut ctx)?,
        QueryKind::Delete(delete) => gen_delete(delete, &mut ctx)?,
    };

    Ok(Statement { sql, params })
}

/// Clause accumulator for one SELECT scope. Wrapping into a subquery drains
/// the current parts into a rendered FROM item and starts a fresh scope.
#[derive(Default)]
struct SelectParts {
    from: String,
    joins: Vec<String>,
    wheres: Vec<String>,
    group_by: Vec<String>,
    order_by: Vec<(String, bool)>,
    limit: Option<String>,
    offset: Option<String>,
    distinct: bool,
    projection: Option<String>,
    /// The raw expression of a single-value projection, for aggregate
    /// terminals without a selector.
    scalar: Option<String>,
    has_window: bool,
    seen_then_by: bool,
}

fn gen_select(select: &SelectQuery, ctx: &mut Context) -> Result<String> {
    let mut parts = SelectParts::default();

    for op in linearize(&select.source) {
        apply_op(op, &mut parts, ctx)?;
    }

    apply_terminal(&select.terminal, parts, ctx)
}

fn linearize(op: &Operation) -> Vec<&Operation> {
    let mut ops = Vec::new();
    let mut current = Some(op);
    while let Some(op) = current {
        ops.push(op);
        current = op.source();
    }
    ops.reverse();
    ops
}

fn apply_op(op: &Operation, parts: &mut SelectParts, ctx: &mut Context) -> Result<()> {
    match op {
        Operation::From(from) => {
            parts.from = if ctx.qualify {
                format!(
                    "{} AS {}",
                    ctx.quote(&from.table)?,
                    ctx.quote(&ctx.alias(from.index))?
                )
            } else {
                ctx.quote(&from.table)?
            };
        }

        Operation::Join(join) => {
            let inner = join.inner.as_from().ok_or_else(|| {
                Error::new(Reason::Guard(
                    "the inner source of a join must be a table".to_string(),
                ))
            })?;
            let keyword = match join.kind {
                JoinKind::Inner => "INNER JOIN",
                JoinKind::Left => "LEFT JOIN",
            };
            let clause = format!(
                "{keyword} {} AS {} ON {} = {}",
                ctx.quote(&inner.table)?,
                ctx.quote(&ctx.alias(inner.index))?,
                write_value(&join.outer_key, ctx)?,
                write_value(&join.inner_key, ctx)?
            );
            parts.joins.push(clause);

            // The join's result selector is the projection until a later
            // select overrides it.
            parts.projection = Some(render_object(&join.selector, ctx)?);
            parts.scalar = None;
            parts.has_window = false;
        }

        Operation::Where { predicate, .. } => {
            // A filter on a window-labeled column cannot run in the scope
            // that labels it; once wrapped, the label is a plain column of
            // the subquery output.
            if predicate.references_synthetic() && parts.has_window {
                wrap_subquery(parts, ctx)?;
            }
            let rendered = write_bool(predicate, ctx)?;
            parts.wheres.push(rendered);
        }

        Operation::Select { selector, .. } => {
            if selector_references_synthetic(selector) && parts.has_window {
                wrap_subquery(parts, ctx)?;
            }
            match selector {
                Selector::Identity => {}
                Selector::Value(value) => {
                    let rendered = write_value(value, ctx)?;
                    parts.projection = Some(rendered.clone());
                    parts.scalar = Some(rendered);
                    parts.has_window = value.contains_window();
                }
                Selector::Object(object) => {
                    parts.projection = Some(render_object(object, ctx)?);
                    parts.scalar = None;
                    parts.has_window = selector.contains_window();
                }
            }
        }

        Operation::GroupBy { key, .. } => {
            let rendered = write_value(key, ctx)?;
            parts.group_by.push(rendered);
        }

        Operation::OrderBy {
            key, descending, ..
        } => {
            if parts.seen_then_by {
                return Err(Error::new(Reason::Guard(
                    "orderBy cannot follow thenBy; use thenBy to extend an ordering".to_string(),
                ))
                .into());
            }
            if key.references_synthetic() && parts.has_window {
                wrap_subquery(parts, ctx)?;
            }
            let rendered = write_value(key, ctx)?;
            parts.order_by.clear();
            parts.order_by.push((rendered, *descending));
        }

        Operation::ThenBy {
            key, descending, ..
        } => {
            if parts.order_by.is_empty() {
                return Err(Error::new(Reason::Guard(
                    "thenBy requires a preceding orderBy".to_string(),
                ))
                .into());
            }
            let rendered = write_value(key, ctx)?;
            parts.order_by.push((rendered, *descending));
            parts.seen_then_by = true;
        }

        Operation::Skip { count, .. } => {
            parts.offset = Some(render_count(count, ctx));
        }

        Operation::Take { count, .. } => {
            parts.limit = Some(render_count(count, ctx));
        }

        Operation::Distinct { .. } => {
            parts.distinct = true;
        }

        Operation::Reverse { .. } => {
            if parts.order_by.is_empty() {
                return Err(Error::new(Reason::Guard(
                    "reverse requires an ordered query".to_string(),
                ))
                .into());
            }
            for (_, descending) in &mut parts.order_by {
                *descending = !*descending;
            }
        }
    }
    Ok(())
}

fn apply_terminal(
    terminal: &Terminal,
    mut parts: SelectParts,
    ctx: &mut Context,
) -> Result<String> {
    match terminal {
        Terminal::ToArray | Terminal::ToList => assemble(parts, ctx),

        Terminal::First { predicate, .. } => {
            push_predicate(predicate, &mut parts, ctx)?;
            parts.limit = Some("1".to_string());
            assemble(parts, ctx)
        }

        // LIMIT 2 so the client can detect unexpected multiplicity.
        Terminal::Single { predicate, .. } => {
            push_predicate(predicate, &mut parts, ctx)?;
            parts.limit = Some("2".to_string());
            assemble(parts, ctx)
        }

        Terminal::Last { predicate, .. } => {
            push_predicate(predicate, &mut parts, ctx)?;
            if parts.order_by.is_empty() {
                parts.order_by.push(("1".to_string(), true));
            } else {
                for (_, descending) in &mut parts.order_by {
                    *descending = !*descending;
                }
            }
            parts.limit = Some("1".to_string());
            assemble(parts, ctx)
        }

        Terminal::Count { predicate } => {
            push_predicate(predicate, &mut parts, ctx)?;
            parts.projection = Some("COUNT(*)".to_string());
            parts.order_by.clear();
            assemble(parts, ctx)
        }

        Terminal::Sum { selector } => aggregate_terminal("SUM", selector, parts, ctx),
        Terminal::Average { selector } => aggregate_terminal("AVG", selector, parts, ctx),
        Terminal::Min { selector } => aggregate_terminal("MIN", selector, parts, ctx),
        Terminal::Max { selector } => aggregate_terminal("MAX", selector, parts, ctx),

        Terminal::Any { predicate } => {
            push_predicate(predicate, &mut parts, ctx)?;
            exists_form(parts, ctx, false)
        }

        Terminal::All { predicate } => {
            let negated = BoolExpr::Not(Box::new(predicate.clone()));
            let rendered = write_bool(&negated, ctx)?;
            parts.wheres.push(rendered);
            exists_form(parts, ctx, true)
        }

        Terminal::Contains { value } => {
            let scalar = parts.scalar.clone().ok_or_else(|| {
                Error::new(Reason::Guard(
                    "contains() requires a single-value projection".to_string(),
                ))
            })?;
            let rendered = write_value(value, ctx)?;
            parts.wheres.push(format!("{scalar} = {rendered}"));
            exists_form(parts, ctx, false)
        }
    }
}

fn aggregate_terminal(
    func: &str,
    selector: &Option<ValueExpr>,
    mut parts: SelectParts,
    ctx: &mut Context,
) -> Result<String> {
    let inner = match selector {
        Some(value) => write_value(value, ctx)?,
        None => parts.scalar.clone().ok_or_else(|| {
            Error::new(Reason::Guard(format!(
                "{}() requires a selector or a single-value projection",
                func.to_lowercase()
            )))
        })?,
    };
    parts.projection = Some(format!("{func}({inner})"));
    parts.scalar = None;
    parts.order_by.clear();
    assemble(parts, ctx)
}

/// `EXISTS` wrapper for `any`/`all`/`contains`.
fn exists_form(mut parts: SelectParts, ctx: &mut Context, negated: bool) -> Result<String> {
    parts.projection = Some("1".to_string());
    parts.scalar = None;
    parts.order_by.clear();
    parts.distinct = false;
    let inner = assemble(parts, ctx)?;

    let exists = if negated {
        format!("NOT EXISTS({inner})")
    } else {
        format!("EXISTS({inner})")
    };
    Ok(format!("SELECT CASE WHEN {exists} THEN 1 ELSE 0 END"))
}

fn push_predicate(
    predicate: &Option<BoolExpr>,
    parts: &mut SelectParts,
    ctx: &mut Context,
) -> Result<()> {
    if let Some(predicate) = predicate {
        if predicate.references_synthetic() && parts.has_window {
            wrap_subquery(parts, ctx)?;
        }
        let rendered = write_bool(predicate, ctx)?;
        parts.wheres.push(rendered);
    }
    Ok(())
}

/// Renders the accumulated scope and restarts it as `FROM (…) AS wN`. From
/// here on column references resolve against the subquery's output, so the
/// scope renders unqualified names.
fn wrap_subquery(parts: &mut SelectParts, ctx: &mut Context) -> Result<()> {
    let inner = assemble(std::mem::take(parts), ctx)?;
    let alias = ctx.subquery_names.gen();
    log::debug!("wrapping projection into subquery `{alias}`");
    parts.from = format!("({inner}) AS {}", ctx.quote(&alias)?);
    ctx.qualify = false;
    Ok(())
}

fn assemble(parts: SelectParts, ctx: &Context) -> Result<String> {
    let mut sql = String::from("SELECT ");
    if parts.distinct {
        sql.push_str("DISTINCT ");
    }
    sql.push_str(parts.projection.as_deref().unwrap_or("*"));

    sql.push_str(" FROM ");
    sql.push_str(&parts.from);

    for join in &parts.joins {
        sql.push(' ');
        sql.push_str(join);
    }

    if !parts.wheres.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&parts.wheres.join(" AND "));
    }

    if !parts.group_by.is_empty() {
        sql.push_str(" GROUP BY ");
        sql.push_str(&parts.group_by.join(", "));
    }

    if !parts.order_by.is_empty() {
        let items = parts
            .order_by
            .iter()
            .map(|(expr, descending)| {
                format!("{expr} {}", if *descending { "DESC" } else { "ASC" })
            })
            .join(", ");
        sql.push_str(" ORDER BY ");
        sql.push_str(&items);
    }

    if let Some(clause) = ctx
        .dialect
        .limit_offset(parts.limit.as_deref(), parts.offset.as_deref())
    {
        sql.push(' ');
        sql.push_str(&clause);
    }

    Ok(sql)
}

fn render_count(count: &CountOperand, ctx: &Context) -> String {
    match count {
        CountOperand::Value(n) => n.to_string(),
        CountOperand::Param(param) => ctx.placeholder(param),
    }
}

fn render_object(object: &ObjectExpr, ctx: &mut Context) -> Result<String> {
    let items: Vec<_> = object
        .entries
        .iter()
        .map(|entry| -> Result<String> {
            Ok(match entry {
                // A whole-row reference has no alias; it is a star expansion.
                ObjectEntry::Field {
                    value: ValueExpr::Reference(source),
                    ..
                } => star_ref(*source, ctx)?,
                ObjectEntry::Field { name, value } => {
                    format!("{} AS {}", write_value(value, ctx)?, ctx.quote(name)?)
                }
                ObjectEntry::Spread { source } => star_ref(*source, ctx)?,
            })
        })
        .try_collect()?;
    Ok(items.join(", "))
}

fn star_ref(source: ColumnSource, ctx: &Context) -> Result<String> {
    match source.table_index() {
        Some(index) if ctx.qualify => Ok(format!("{}.*", ctx.quote(&ctx.alias(index))?)),
        _ => Ok("*".to_string()),
    }
}

fn selector_references_synthetic(selector: &Selector) -> bool {
    match selector {
        Selector::Identity => false,
        Selector::Value(value) => value.references_synthetic(),
        Selector::Object(object) => object.entries.iter().any(|entry| match entry {
            ObjectEntry::Field { value, .. } => value.references_synthetic(),
            ObjectEntry::Spread { .. } => false,
        }),
    }
}

fn gen_insert(insert: &InsertStatement, ctx: &mut Context) -> Result<String> {
    ctx.qualify = false;

    let mut columns = Vec::new();
    let mut values = Vec::new();
    for entry in &insert.values.entries {
        match entry {
            ObjectEntry::Field { name, value } => {
                columns.push(ctx.quote(name)?);
                values.push(write_value(value, ctx)?);
            }
            ObjectEntry::Spread { .. } => {
                return Err(Error::new(Reason::Guard(
                    "spread is not valid in an insert payload".to_string(),
                ))
                .into())
            }
        }
    }

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        ctx.quote(&insert.table)?,
        columns.join(", "),
        values.join(", ")
    );

    if let Some(returning) = &insert.returning {
        sql.push_str(&returning_clause(returning, ctx)?);
    }
    Ok(sql)
}

fn gen_update(update: &UpdateStatement, ctx: &mut Context) -> Result<String> {
    ctx.qualify = false;

    if update.predicate.is_none() && !update.allow_full_table {
        return Err(Error::new(Reason::Guard(
            "UPDATE without a WHERE clause; call allowFullTableUpdate() to run a \
             full-table update"
            .to_string(),
        ))
        .into());
    }

    let assignments: Vec<_> = update
        .assignments
        .entries
        .iter()
        .map(|entry| -> Result<String> {
            match entry {
                ObjectEntry::Field { name, value } => Ok(format!(
                    "{} = {}",
                    ctx.quote(name)?,
                    write_value(value, ctx)?
                )),
                ObjectEntry::Spread { .. } => Err(Error::new(Reason::Guard(
                    "spread is not valid in an update payload".to_string(),
                ))
                .into()),
            }
        })
        .try_collect()?;

    let mut sql = format!(
        "UPDATE {} SET {}",
        ctx.quote(&update.table)?,
        assignments.join(", ")
    );

    if let Some(predicate) = &update.predicate {
        sql.push_str(" WHERE ");
        sql.push_str(&write_bool(predicate, ctx)?);
    }
    if let Some(returning) = &update.returning {
        sql.push_str(&returning_clause(returning, ctx)?);
    }
    Ok(sql)
}

fn gen_delete(delete: &DeleteStatement, ctx: &mut Context) -> Result<String> {
    ctx.qualify = false;

    if delete.predicate.is_none() && !delete.allow_full_table {
        return Err(Error::new(Reason::Guard(
            "DELETE without a WHERE clause; call allowFullTableDelete() to run a \
             full-table delete"
            .to_string(),
        ))
        .into());
    }

    let mut sql = format!("DELETE FROM {}", ctx.quote(&delete.table)?);

    if let Some(predicate) = &delete.predicate {
        sql.push_str(" WHERE ");
        sql.push_str(&write_bool(predicate, ctx)?);
    }
    if let Some(returning) = &delete.returning {
        sql.push_str(&returning_clause(returning, ctx)?);
    }
    Ok(sql)
}

fn returning_clause(selector: &Selector, ctx: &mut Context) -> Result<String> {
    if !ctx.dialect.supports_returning() {
        return Err(Error::new(Reason::Guard(
            "RETURNING is not supported by the target dialect".to_string(),
        ))
        .into());
    }
    let projection = match selector {
        Selector::Identity => "*".to_string(),
        Selector::Value(value) => write_value(value, ctx)?,
        Selector::Object(object) => render_object(object, ctx)?,
    };
    Ok(format!(" RETURNING {projection}"))
}
