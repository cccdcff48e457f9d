//! State threaded through one resolve pass.

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use serde::Serialize;

use crate::ast::expr::ValueExpr;
use crate::ast::shape::Shape;
use crate::params::{ParamValue, Params};
use crate::schema::{ColumnType, Schema};
use crate::utils::IdGenerator;

/// Why an auto-parameter exists: the literal it replaced, and the column it
/// was compared against when that is known.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoParamInfo {
    pub value: ParamValue,
    pub field_name: Option<String>,
    pub table_name: Option<String>,
}

/// What a row parameter stands for at the current chain position.
#[derive(Debug, Clone)]
pub enum Binding {
    /// A row of a base table, by discovery index.
    Table { index: usize },
    /// A row of a projected or joined result.
    Shape(Shape),
    /// The grouping handle bound by `select` after `groupBy`.
    Group {
        key: ValueExpr,
        element: Box<Binding>,
    },
}

pub struct VisitorContext<'a> {
    pub schema: &'a Schema,
    /// Name of the external-params lambda parameter, if declared.
    pub query_param: Option<String>,
    /// Name of the helpers lambda parameter, if declared.
    pub helper_param: Option<String>,
    /// Row parameters currently in scope.
    bindings: HashMap<String, Binding>,
    /// Base-table names in discovery order.
    pub tables: Vec<String>,
    pub auto_params: Params,
    pub auto_param_infos: BTreeMap<String, AutoParamInfo>,
    param_ids: IdGenerator<usize>,
    /// Mutation statements resolve columns without table provenance.
    pub direct_columns: bool,
    pub in_select_projection: bool,
    /// Set whenever a column (or whole-row/aggregate) reference resolves;
    /// used to reject literal-only computation in projections.
    pub saw_column_ref: bool,
}

impl<'a> VisitorContext<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        VisitorContext {
            schema,
            query_param: None,
            helper_param: None,
            bindings: HashMap::new(),
            tables: Vec::new(),
            auto_params: Params::new(),
            auto_param_infos: BTreeMap::new(),
            param_ids: IdGenerator::starting_at(1),
            direct_columns: false,
            in_select_projection: false,
            saw_column_ref: false,
        }
    }

    /// A context resuming from a snapshot, so staged fragments continue the
    /// parameter numbering of earlier stages.
    pub fn resuming(
        schema: &'a Schema,
        auto_params: Params,
        auto_param_infos: BTreeMap<String, AutoParamInfo>,
        next_param: usize,
    ) -> Self {
        VisitorContext {
            auto_params,
            auto_param_infos,
            param_ids: IdGenerator::starting_at(next_param),
            ..VisitorContext::new(schema)
        }
    }

    pub fn next_param_id(&self) -> usize {
        self.param_ids.peek()
    }

    pub fn intern_table(&mut self, name: &str) -> usize {
        self.tables.push(name.to_string());
        self.tables.len() - 1
    }

    pub fn table_name(&self, index: usize) -> &str {
        &self.tables[index]
    }

    pub fn column_type(&self, table_index: usize, column: &str) -> Option<ColumnType> {
        self.schema
            .table_def(self.tables.get(table_index)?)
            .and_then(|def| def.column(column))
    }

    /// Mints the next `__pN` name for a lifted literal.
    pub fn fresh_param(&mut self, value: ParamValue) -> String {
        let name = format!("__p{}", self.param_ids.gen());
        self.auto_params.insert(&name, value.clone());
        self.auto_param_infos.insert(
            name.clone(),
            AutoParamInfo {
                value,
                field_name: None,
                table_name: None,
            },
        );
        name
    }

    /// Records the column context of an auto-parameter, derived from the
    /// other side of the comparison it appears in.
    pub fn annotate_param(&mut self, name: &str, field_name: &str, table_index: Option<usize>) {
        if let Some(info) = self.auto_param_infos.get_mut(name) {
            info.field_name = Some(field_name.to_string());
            info.table_name = table_index.map(|i| self.tables[i].clone());
        }
    }

    pub fn binding(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    pub fn is_query_param(&self, name: &str) -> bool {
        self.query_param.as_deref() == Some(name)
    }

    pub fn is_helper(&self, name: &str) -> bool {
        self.helper_param.as_deref() == Some(name)
    }

    /// Runs `f` with a row parameter bound, restoring the outer scope after.
    pub fn scoped<R>(
        &mut self,
        name: &str,
        binding: Binding,
        f: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        let shadowed = self.bindings.insert(name.to_string(), binding);
        let result = f(self);
        match shadowed {
            Some(previous) => self.bindings.insert(name.to_string(), previous),
            None => self.bindings.remove(name),
        };
        result
    }

    /// [VisitorContext::scoped], for the two parameters of a join result
    /// selector.
    pub fn scoped2<R>(
        &mut self,
        (outer_name, outer): (&str, Binding),
        (inner_name, inner): (&str, Binding),
        f: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        self.scoped(outer_name, outer, |ctx| ctx.scoped(inner_name, inner, f))
    }
}
