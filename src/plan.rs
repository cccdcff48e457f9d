//! Plan values and the staged (typestate) mutation builders.
//!
//! A plan is an immutable, `Arc`-shared parse result bound to a dialect;
//! `to_sql` is a pure function over it. The staged builders let mutation
//! statements be assembled fragment by fragment, with the stage encoded in
//! the type so that a statement can only be emitted once it is structurally
//! complete.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::ast::expr::{BoolExpr, ObjectExpr, Selector};
use crate::ast::ops::{
    DeleteStatement, InsertStatement, Query, QueryKind, UpdateStatement,
};
use crate::error::{downcast, Error, ErrorMessages, Reason};
use crate::params::Params;
use crate::parser;
use crate::schema::Schema;
use crate::sql::{self, Dialect, Statement};
use crate::visit::{self, AutoParamInfo, FragmentState};

/// One parse's output: the operation tree, the auto-parameter template, and
/// the source text (kept for composing error displays).
#[derive(Debug, Clone)]
pub struct ParsedQuery {
    pub query: Query,
    pub auto_params: Params,
    pub param_infos: BTreeMap<String, AutoParamInfo>,
    pub source: String,
}

/// Emits `{ sql, params }` from a plan, merging the caller's runtime
/// parameters over the plan's auto-parameters.
pub trait ToSql {
    fn to_sql(&self, runtime_params: &Params) -> Result<Statement, ErrorMessages>;
}

macro_rules! plan_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name {
            pub(crate) parsed: Arc<ParsedQuery>,
            pub(crate) dialect: Dialect,
        }

        impl $name {
            pub fn query(&self) -> &Query {
                &self.parsed.query
            }

            pub fn dialect(&self) -> Dialect {
                self.dialect
            }

            /// The parameters lifted out of the lambda, with their values.
            pub fn auto_params(&self) -> &Params {
                &self.parsed.auto_params
            }

            /// Field/table context for each auto-parameter.
            pub fn param_info(&self) -> &BTreeMap<String, AutoParamInfo> {
                &self.parsed.param_infos
            }
        }

        impl ToSql for $name {
            fn to_sql(&self, runtime_params: &Params) -> Result<Statement, ErrorMessages> {
                sql::compile(
                    &self.parsed.query,
                    &self.parsed.auto_params,
                    runtime_params,
                    self.dialect,
                )
                .map_err(downcast)
                .map_err(|e| e.composed("lambda", &self.parsed.source, false))
            }
        }
    };
}

plan_type!(
    /// A compiled select pipeline.
    SelectPlan
);
plan_type!(
    /// A compiled INSERT statement.
    InsertPlan
);
plan_type!(
    /// A compiled UPDATE statement.
    UpdatePlan
);
plan_type!(
    /// A compiled DELETE statement.
    DeletePlan
);

// Builder stages.
pub struct Initial;
pub struct WithSet;
pub struct WithValues;
pub struct Complete;
pub struct WithReturning;

/// Stages from which a statement may be emitted.
pub trait Emittable {}
impl Emittable for WithSet {}
impl Emittable for WithValues {}
impl Emittable for Complete {}
impl Emittable for WithReturning {}

#[derive(Debug, Clone)]
struct BuilderState {
    schema: Schema,
    dialect: Dialect,
    table: String,
    assignments: Option<ObjectExpr>,
    values: Option<ObjectExpr>,
    predicate: Option<BoolExpr>,
    allow_full_table: bool,
    returning: Option<Selector>,
    fragments: FragmentState,
    sources: Vec<String>,
}

impl BuilderState {
    fn new(schema: &Schema, dialect: Dialect, table: &str) -> Result<Self, ErrorMessages> {
        if schema.table_def(table).is_none() {
            return Err(downcast(
                Error::new(Reason::NotFound {
                    name: table.to_string(),
                    namespace: "table".to_string(),
                })
                .into(),
            ));
        }
        Ok(BuilderState {
            schema: schema.clone(),
            dialect,
            table: table.to_string(),
            assignments: None,
            values: None,
            predicate: None,
            allow_full_table: false,
            returning: None,
            fragments: FragmentState::default(),
            sources: Vec::new(),
        })
    }

    fn fragment<R>(
        &mut self,
        source: &str,
        f: impl FnOnce(&Schema, &str, &crate::ast::source::Arrow, &mut FragmentState) -> anyhow::Result<R>,
    ) -> Result<R, ErrorMessages> {
        let result = parser::parse_lambda(source)
            .and_then(|arrow| f(&self.schema, &self.table, &arrow, &mut self.fragments))
            .map_err(downcast)
            .map_err(|e| e.composed("fragment", source, false))?;
        self.sources.push(source.to_string());
        Ok(result)
    }

    fn plan(&self, kind: QueryKind) -> ParsedQuery {
        ParsedQuery {
            query: Query {
                kind,
                tables: vec![self.table.clone()],
            },
            auto_params: self.fragments.auto_params.clone(),
            param_infos: self.fragments.param_infos.clone(),
            source: self.sources.join("\n"),
        }
    }
}

macro_rules! builder_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        pub struct $name<Stage = Initial> {
            state: BuilderState,
            _stage: PhantomData<Stage>,
        }

        impl<Stage> $name<Stage> {
            fn advance<Next>(&self, state: BuilderState) -> $name<Next> {
                let _ = self;
                $name {
                    state,
                    _stage: PhantomData,
                }
            }
        }
    };
}

builder_type!(
    /// Staged UPDATE: `Initial → set → WithSet → filter/allow → Complete →
    /// returning → WithReturning`.
    UpdateBuilder
);
builder_type!(
    /// Staged INSERT: `Initial → values → WithValues → returning →
    /// WithReturning`.
    InsertBuilder
);
builder_type!(
    /// Staged DELETE: `Initial → filter/allow → Complete → returning →
    /// WithReturning`.
    DeleteBuilder
);

/// Starts a staged UPDATE against `table`.
pub fn update(
    schema: &Schema,
    dialect: Dialect,
    table: &str,
) -> Result<UpdateBuilder<Initial>, ErrorMessages> {
    Ok(UpdateBuilder {
        state: BuilderState::new(schema, dialect, table)?,
        _stage: PhantomData,
    })
}

/// Starts a staged INSERT against `table`.
pub fn insert(
    schema: &Schema,
    dialect: Dialect,
    table: &str,
) -> Result<InsertBuilder<Initial>, ErrorMessages> {
    Ok(InsertBuilder {
        state: BuilderState::new(schema, dialect, table)?,
        _stage: PhantomData,
    })
}

/// Starts a staged DELETE against `table`.
pub fn delete(
    schema: &Schema,
    dialect: Dialect,
    table: &str,
) -> Result<DeleteBuilder<Initial>, ErrorMessages> {
    Ok(DeleteBuilder {
        state: BuilderState::new(schema, dialect, table)?,
        _stage: PhantomData,
    })
}

impl UpdateBuilder<Initial> {
    /// `set("(u, p) => ({ name: p.name })")`
    pub fn set(&self, source: &str) -> Result<UpdateBuilder<WithSet>, ErrorMessages> {
        let mut state = self.state.clone();
        let assignments = state.fragment(source, visit::resolve_set_fragment)?;
        state.assignments = Some(assignments);
        Ok(self.advance(state))
    }
}

impl UpdateBuilder<WithSet> {
    /// `filter("(u, p) => u.id == p.id")`
    pub fn filter(&self, source: &str) -> Result<UpdateBuilder<Complete>, ErrorMessages> {
        let mut state = self.state.clone();
        let previous = state.predicate.take();
        let predicate = state.fragment(source, |schema, table, arrow, fragments| {
            visit::resolve_predicate_fragment(schema, table, arrow, previous, fragments)
        })?;
        state.predicate = Some(predicate);
        Ok(self.advance(state))
    }

    pub fn allow_full_table_update(&self) -> UpdateBuilder<Complete> {
        let mut state = self.state.clone();
        state.allow_full_table = true;
        self.advance(state)
    }

    pub fn returning(&self, source: &str) -> Result<UpdateBuilder<WithReturning>, ErrorMessages> {
        let mut state = self.state.clone();
        let selector = state.fragment(source, visit::resolve_returning_fragment)?;
        state.returning = Some(selector);
        Ok(self.advance(state))
    }
}

impl UpdateBuilder<Complete> {
    /// A further filter AND-combines with the existing predicate.
    pub fn filter(&self, source: &str) -> Result<UpdateBuilder<Complete>, ErrorMessages> {
        let mut state = self.state.clone();
        let previous = state.predicate.take();
        let predicate = state.fragment(source, |schema, table, arrow, fragments| {
            visit::resolve_predicate_fragment(schema, table, arrow, previous, fragments)
        })?;
        state.predicate = Some(predicate);
        Ok(self.advance(state))
    }

    pub fn returning(&self, source: &str) -> Result<UpdateBuilder<WithReturning>, ErrorMessages> {
        let mut state = self.state.clone();
        let selector = state.fragment(source, visit::resolve_returning_fragment)?;
        state.returning = Some(selector);
        Ok(self.advance(state))
    }
}

impl<Stage: Emittable> UpdateBuilder<Stage> {
    /// Freezes the builder into a plan value.
    pub fn to_plan(&self) -> Result<UpdatePlan, ErrorMessages> {
        let assignments = self.state.assignments.clone().ok_or_else(|| {
            downcast(
                Error::new(Reason::Structural(
                    "UPDATE requires set() before generating SQL".to_string(),
                ))
                .into(),
            )
        })?;
        let kind = QueryKind::Update(UpdateStatement {
            table: self.state.table.clone(),
            assignments,
            predicate: self.state.predicate.clone(),
            allow_full_table: self.state.allow_full_table,
            returning: self.state.returning.clone(),
        });
        Ok(UpdatePlan {
            parsed: Arc::new(self.state.plan(kind)),
            dialect: self.state.dialect,
        })
    }
}

impl<Stage: Emittable> ToSql for UpdateBuilder<Stage> {
    fn to_sql(&self, runtime_params: &Params) -> Result<Statement, ErrorMessages> {
        self.to_plan()?.to_sql(runtime_params)
    }
}

impl InsertBuilder<Initial> {
    /// `values("(p) => ({ name: p.name })")`
    pub fn values(&self, source: &str) -> Result<InsertBuilder<WithValues>, ErrorMessages> {
        let mut state = self.state.clone();
        let values = state.fragment(source, visit::resolve_values_fragment)?;
        state.values = Some(values);
        Ok(self.advance(state))
    }
}

impl InsertBuilder<WithValues> {
    pub fn returning(&self, source: &str) -> Result<InsertBuilder<WithReturning>, ErrorMessages> {
        let mut state = self.state.clone();
        let selector = state.fragment(source, visit::resolve_returning_fragment)?;
        state.returning = Some(selector);
        Ok(self.advance(state))
    }
}

impl<Stage: Emittable> InsertBuilder<Stage> {
    pub fn to_plan(&self) -> Result<InsertPlan, ErrorMessages> {
        let values = self.state.values.clone().ok_or_else(|| {
            downcast(
                Error::new(Reason::Structural(
                    "INSERT requires values() before generating SQL".to_string(),
                ))
                .into(),
            )
        })?;
        let kind = QueryKind::Insert(InsertStatement {
            table: self.state.table.clone(),
            values,
            returning: self.state.returning.clone(),
        });
        Ok(InsertPlan {
            parsed: Arc::new(self.state.plan(kind)),
            dialect: self.state.dialect,
        })
    }
}

impl<Stage: Emittable> ToSql for InsertBuilder<Stage> {
    fn to_sql(&self, runtime_params: &Params) -> Result<Statement, ErrorMessages> {
        self.to_plan()?.to_sql(runtime_params)
    }
}

impl DeleteBuilder<Initial> {
    /// `filter("(u, p) => u.id == p.id")`
    pub fn filter(&self, source: &str) -> Result<DeleteBuilder<Complete>, ErrorMessages> {
        let mut state = self.state.clone();
        let previous = state.predicate.take();
        let predicate = state.fragment(source, |schema, table, arrow, fragments| {
            visit::resolve_predicate_fragment(schema, table, arrow, previous, fragments)
        })?;
        state.predicate = Some(predicate);
        Ok(self.advance(state))
    }

    pub fn allow_full_table_delete(&self) -> DeleteBuilder<Complete> {
        let mut state = self.state.clone();
        state.allow_full_table = true;
        self.advance(state)
    }
}

impl DeleteBuilder<Complete> {
    pub fn filter(&self, source: &str) -> Result<DeleteBuilder<Complete>, ErrorMessages> {
        let mut state = self.state.clone();
        let previous = state.predicate.take();
        let predicate = state.fragment(source, |schema, table, arrow, fragments| {
            visit::resolve_predicate_fragment(schema, table, arrow, previous, fragments)
        })?;
        state.predicate = Some(predicate);
        Ok(self.advance(state))
    }

    pub fn returning(&self, source: &str) -> Result<DeleteBuilder<WithReturning>, ErrorMessages> {
        let mut state = self.state.clone();
        let selector = state.fragment(source, visit::resolve_returning_fragment)?;
        state.returning = Some(selector);
        Ok(self.advance(state))
    }
}

impl<Stage: Emittable> DeleteBuilder<Stage> {
    pub fn to_plan(&self) -> Result<DeletePlan, ErrorMessages> {
        let kind = QueryKind::Delete(DeleteStatement {
            table: self.state.table.clone(),
            predicate: self.state.predicate.clone(),
            allow_full_table: self.state.allow_full_table,
            returning: self.state.returning.clone(),
        });
        Ok(DeletePlan {
            parsed: Arc::new(self.state.plan(kind)),
            dialect: self.state.dialect,
        })
    }
}

impl<Stage: Emittable> ToSql for DeleteBuilder<Stage> {
    fn to_sql(&self, runtime_params: &Params) -> Result<Statement, ErrorMessages> {
        self.to_plan()?.to_sql(runtime_params)
    }
}
