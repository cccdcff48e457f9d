//! The visitor pipeline: turns the syntactic AST of a lambda into the typed
//! operation and expression IR, threading a [context::VisitorContext] that
//! tracks parameter roles, row bindings, result shapes and auto-parameters.

mod chain;
mod context;
mod predicate;
mod shape;
mod value;
mod window;

use std::collections::BTreeMap;

use anyhow::Result;

use crate::ast::expr::{BoolExpr, LogicalOp, ObjectExpr, Selector};
use crate::ast::ops::Query;
use crate::ast::source::Arrow;
use crate::error::{Error, Reason};
use crate::params::Params;
use crate::schema::Schema;

pub use context::AutoParamInfo;

use context::{Binding, VisitorContext};

/// Everything one parse produces: the operation tree plus the auto-parameter
/// template that later emissions merge runtime parameters over.
#[derive(Debug, Clone)]
pub struct ResolvedQuery {
    pub query: Query,
    pub auto_params: Params,
    pub param_infos: BTreeMap<String, AutoParamInfo>,
}

/// Resolves a full query lambda (select or mutation).
pub fn resolve_query(schema: &Schema, arrow: &Arrow) -> Result<ResolvedQuery> {
    let mut ctx = VisitorContext::new(schema);
    let query = chain::resolve_chain(&mut ctx, arrow)?;

    Ok(ResolvedQuery {
        query,
        auto_params: ctx.auto_params,
        param_infos: ctx.auto_param_infos,
    })
}

/// Auto-parameter state carried between the stages of a fluent plan handle,
/// so each fragment resumes the numbering where the previous one stopped.
#[derive(Debug, Clone)]
pub struct FragmentState {
    pub auto_params: Params,
    pub param_infos: BTreeMap<String, AutoParamInfo>,
    pub next_param: usize,
}

impl Default for FragmentState {
    fn default() -> Self {
        FragmentState {
            auto_params: Params::new(),
            param_infos: BTreeMap::new(),
            next_param: 1,
        }
    }
}

impl FragmentState {
    fn context<'a>(&self, schema: &'a Schema, table: &str) -> VisitorContext<'a> {
        let mut ctx = VisitorContext::resuming(
            schema,
            self.auto_params.clone(),
            self.param_infos.clone(),
            self.next_param,
        );
        ctx.intern_table(table);
        ctx.direct_columns = true;
        ctx
    }

    fn capture(&mut self, ctx: VisitorContext) {
        self.next_param = ctx.next_param_id();
        self.auto_params = ctx.auto_params;
        self.param_infos = ctx.auto_param_infos;
    }
}

/// Mutation payload keys are column names; check them against the schema.
fn validate_payload_columns(schema: &Schema, table: &str, object: &ObjectExpr) -> Result<()> {
    let def = schema
        .table_def(table)
        .expect("builder validates the table");
    for entry in &object.entries {
        if let crate::ast::expr::ObjectEntry::Field { name, .. } = entry {
            if def.column(name).is_none() {
                return Err(Error::new(Reason::NotFound {
                    name: name.clone(),
                    namespace: format!("column of table `{table}`"),
                })
                .into());
            }
        }
    }
    Ok(())
}

/// Fragment lambdas bind `(row, params)`; `values` fragments, which have no
/// row, bind `(params)` alone.
fn fragment_roles(ctx: &mut VisitorContext, arrow: &Arrow, has_row: bool) -> Option<String> {
    if has_row {
        ctx.query_param = arrow.params.get(1).cloned();
        arrow.params.first().cloned()
    } else {
        ctx.query_param = arrow.params.first().cloned();
        None
    }
}

/// `set("(u, p) => ({ name: p.name })")` for a staged update.
pub fn resolve_set_fragment(
    schema: &Schema,
    table: &str,
    arrow: &Arrow,
    state: &mut FragmentState,
) -> Result<ObjectExpr> {
    let mut ctx = state.context(schema, table);
    let row = fragment_roles(&mut ctx, arrow, true);

    let entries = match &arrow.body.kind {
        crate::ast::source::ExprKind::Object(entries) => entries.as_slice(),
        kind => {
            return Err(Error::new(Reason::Expected {
                who: Some("`set`".to_string()),
                expected: "an object of assignments".to_string(),
                found: kind.name().to_string(),
            })
            .into())
        }
    };

    let span = arrow.body.span;
    let object = match row {
        Some(row) => ctx.scoped(&row.clone(), Binding::Table { index: 0 }, |ctx| {
            Ok(value::lower_object(ctx, entries, span)?.0)
        })?,
        None => value::lower_object(&mut ctx, entries, span)?.0,
    };
    validate_payload_columns(schema, table, &object)?;

    state.capture(ctx);
    Ok(object)
}

/// `values("(p) => ({ name: p.name })")` for a staged insert.
pub fn resolve_values_fragment(
    schema: &Schema,
    table: &str,
    arrow: &Arrow,
    state: &mut FragmentState,
) -> Result<ObjectExpr> {
    let mut ctx = state.context(schema, table);
    fragment_roles(&mut ctx, arrow, false);

    let entries = match &arrow.body.kind {
        crate::ast::source::ExprKind::Object(entries) => entries.as_slice(),
        kind => {
            return Err(Error::new(Reason::Expected {
                who: Some("`values`".to_string()),
                expected: "an object of values".to_string(),
                found: kind.name().to_string(),
            })
            .into())
        }
    };

    let object = value::lower_object(&mut ctx, entries, arrow.body.span)?.0;
    validate_payload_columns(schema, table, &object)?;
    state.capture(ctx);
    Ok(object)
}

/// `filter("(u, p) => u.id == p.id")` for a staged update/delete. A second
/// filter AND-combines with the first.
pub fn resolve_predicate_fragment(
    schema: &Schema,
    table: &str,
    arrow: &Arrow,
    previous: Option<BoolExpr>,
    state: &mut FragmentState,
) -> Result<BoolExpr> {
    let mut ctx = state.context(schema, table);
    let row = fragment_roles(&mut ctx, arrow, true).ok_or_else(|| {
        Error::new(Reason::Expected {
            who: Some("`filter`".to_string()),
            expected: "a lambda with a row parameter".to_string(),
            found: "no parameters".to_string(),
        })
    })?;

    let new = ctx.scoped(&row.clone(), Binding::Table { index: 0 }, |ctx| {
        predicate::lower_bool(ctx, &arrow.body)
    })?;
    state.capture(ctx);

    Ok(match previous {
        Some(prev) => BoolExpr::Logical {
            op: LogicalOp::And,
            left: Box::new(prev),
            right: Box::new(new),
        },
        None => new,
    })
}

/// `returning("(u) => ({ id: u.id })")` for any staged mutation.
pub fn resolve_returning_fragment(
    schema: &Schema,
    table: &str,
    arrow: &Arrow,
    state: &mut FragmentState,
) -> Result<Selector> {
    let mut ctx = state.context(schema, table);
    fragment_roles(&mut ctx, arrow, true);

    let (selector, _) = value::lower_selector(&mut ctx, arrow, Binding::Table { index: 0 })?;
    state.capture(ctx);
    Ok(selector)
}
