//! Scalar expression IR: the insides of operations.
//!
//! Two disjoint unions — [ValueExpr] produces a value, [BoolExpr] produces
//! truth — plus the composite [ObjectExpr] used by projections and mutation
//! payloads. Everything here is already resolved: columns know their source
//! table, literals have been lifted into named parameters, null comparisons
//! have been normalized into [BoolExpr::IsNull].

use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};

/// Where a column reference points.
///
/// Every variant except `Direct` and `Synthetic` resolves to a base-table
/// index (alias `t{index}` whenever the statement references more than one
/// table); the distinction records how the reference was reached.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize, EnumAsInner)]
pub enum ColumnSource {
    /// Single-table statement, no aliasing in play.
    Direct,
    /// A base table, by discovery index.
    Table { index: usize },
    /// A row parameter of the nearest join (0 = outer, 1 = inner).
    JoinParam { position: u8, table: usize },
    /// Carried through a prior join's result shape.
    JoinResult { table: usize },
    /// Flattened through an object spread.
    Spread { table: usize },
    /// A labeled output of the enclosing projection (window columns).
    /// Filtering on one of these forces subquery wrapping.
    Synthetic,
}

impl ColumnSource {
    pub fn table_index(&self) -> Option<usize> {
        match self {
            ColumnSource::Direct | ColumnSource::Synthetic => None,
            ColumnSource::Table { index } => Some(*index),
            ColumnSource::JoinParam { table, .. } => Some(*table),
            ColumnSource::JoinResult { table } => Some(*table),
            ColumnSource::Spread { table } => Some(*table),
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub source: ColumnSource,
}

/// A reference to a named parameter, either external (`p.min`) or an
/// auto-parameter minted from a literal (`__p1`).
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ParamRef {
    pub name: String,
    /// Nested property path below `name`, dot-joined.
    pub property: Option<String>,
}

impl ParamRef {
    pub fn new(name: impl Into<String>) -> Self {
        ParamRef {
            name: name.into(),
            property: None,
        }
    }

    /// The full path used in the placeholder (`filter.min`).
    pub fn path(&self) -> String {
        match &self.property {
            Some(property) => format!("{}.{}", self.name, property),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, EnumAsInner)]
pub enum Constant {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum StringMethod {
    ToLower,
    ToUpper,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum WindowFunc {
    RowNumber,
    Rank,
    DenseRank,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct WindowOrder {
    pub expr: ValueExpr,
    pub direction: SortDirection,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct WindowExpr {
    pub partition_by: Vec<ValueExpr>,
    pub order_by: Vec<WindowOrder>,
    pub func: WindowFunc,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, EnumAsInner)]
pub enum ValueExpr {
    Column(Column),
    Constant(Constant),
    Param(ParamRef),
    Arithmetic {
        op: ArithOp,
        left: Box<ValueExpr>,
        right: Box<ValueExpr>,
    },
    Concat {
        left: Box<ValueExpr>,
        right: Box<ValueExpr>,
    },
    StringMethod {
        object: Box<ValueExpr>,
        method: StringMethod,
    },
    Coalesce(Vec<ValueExpr>),
    Conditional {
        condition: Box<BoolExpr>,
        then: Box<ValueExpr>,
        otherwise: Box<ValueExpr>,
    },
    Aggregate {
        func: AggregateFunc,
        expr: Option<Box<ValueExpr>>,
    },
    /// A whole-row reference (join selectors, spreads).
    Reference(ColumnSource),
    Window(WindowExpr),
    /// A boolean expression projected as a value.
    Bool(Box<BoolExpr>),
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum BoolMethod {
    StartsWith,
    EndsWith,
    Contains,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum CiFunc {
    IEquals,
    IStartsWith,
    IEndsWith,
    IContains,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub enum InList {
    Values(Vec<ValueExpr>),
    Param(ParamRef),
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, EnumAsInner)]
pub enum BoolExpr {
    Comparison {
        op: CompareOp,
        left: Box<ValueExpr>,
        right: Box<ValueExpr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<BoolExpr>,
        right: Box<BoolExpr>,
    },
    Not(Box<BoolExpr>),
    Constant(bool),
    /// A boolean-typed column standing alone as a predicate.
    Column(Column),
    /// A boolean-typed parameter standing alone as a predicate.
    Param(ParamRef),
    Method {
        object: Box<ValueExpr>,
        method: BoolMethod,
        arg: Box<ValueExpr>,
    },
    In {
        value: Box<ValueExpr>,
        list: InList,
    },
    IsNull {
        expr: Box<ValueExpr>,
        negated: bool,
    },
    CaseInsensitive {
        func: CiFunc,
        left: Box<ValueExpr>,
        right: Box<ValueExpr>,
    },
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ObjectExpr {
    pub entries: Vec<ObjectEntry>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub enum ObjectEntry {
    Field { name: String, value: ValueExpr },
    Spread { source: ColumnSource },
}

/// What a `select` (or `returning`) projects.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, EnumAsInner)]
pub enum Selector {
    /// `u => u`
    Identity,
    /// A single scalar.
    Value(ValueExpr),
    Object(ObjectExpr),
}

impl ValueExpr {
    /// Whether any part of the expression reads table data (as opposed to
    /// parameters and constants only).
    pub fn references_source(&self) -> bool {
        match self {
            ValueExpr::Column(_) | ValueExpr::Reference(_) | ValueExpr::Window(_) => true,
            ValueExpr::Aggregate { expr, .. } => {
                expr.as_ref().map_or(true, |e| e.references_source())
            }
            ValueExpr::Constant(_) | ValueExpr::Param(_) => false,
            ValueExpr::Arithmetic { left, right, .. } | ValueExpr::Concat { left, right } => {
                left.references_source() || right.references_source()
            }
            ValueExpr::StringMethod { object, .. } => object.references_source(),
            ValueExpr::Coalesce(exprs) => exprs.iter().any(|e| e.references_source()),
            ValueExpr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                condition.references_source()
                    || then.references_source()
                    || otherwise.references_source()
            }
            ValueExpr::Bool(b) => b.references_source(),
        }
    }

    pub fn contains_window(&self) -> bool {
        match self {
            ValueExpr::Window(_) => true,
            ValueExpr::Arithmetic { left, right, .. } | ValueExpr::Concat { left, right } => {
                left.contains_window() || right.contains_window()
            }
            ValueExpr::StringMethod { object, .. } => object.contains_window(),
            ValueExpr::Coalesce(exprs) => exprs.iter().any(|e| e.contains_window()),
            ValueExpr::Conditional {
                then, otherwise, ..
            } => then.contains_window() || otherwise.contains_window(),
            _ => false,
        }
    }

    pub fn references_synthetic(&self) -> bool {
        match self {
            ValueExpr::Column(c) => c.source == ColumnSource::Synthetic,
            ValueExpr::Arithmetic { left, right, .. } | ValueExpr::Concat { left, right } => {
                left.references_synthetic() || right.references_synthetic()
            }
            ValueExpr::StringMethod { object, .. } => object.references_synthetic(),
            ValueExpr::Coalesce(exprs) => exprs.iter().any(|e| e.references_synthetic()),
            ValueExpr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                condition.references_synthetic()
                    || then.references_synthetic()
                    || otherwise.references_synthetic()
            }
            ValueExpr::Aggregate { expr, .. } => {
                expr.as_ref().is_some_and(|e| e.references_synthetic())
            }
            ValueExpr::Bool(b) => b.references_synthetic(),
            _ => false,
        }
    }

    /// Whether the expression computes anything (arithmetic or concatenation),
    /// used to reject literal-only computation in projections.
    pub fn is_computed(&self) -> bool {
        match self {
            ValueExpr::Arithmetic { .. } | ValueExpr::Concat { .. } => true,
            ValueExpr::StringMethod { object, .. } => object.is_computed(),
            ValueExpr::Coalesce(exprs) => exprs.iter().any(|e| e.is_computed()),
            ValueExpr::Conditional {
                then, otherwise, ..
            } => then.is_computed() || otherwise.is_computed(),
            _ => false,
        }
    }
}

impl BoolExpr {
    pub fn references_source(&self) -> bool {
        match self {
            BoolExpr::Comparison { left, right, .. }
            | BoolExpr::CaseInsensitive { left, right, .. } => {
                left.references_source() || right.references_source()
            }
            BoolExpr::Logical { left, right, .. } => {
                left.references_source() || right.references_source()
            }
            BoolExpr::Not(inner) => inner.references_source(),
            BoolExpr::Constant(_) | BoolExpr::Param(_) => false,
            BoolExpr::Column(_) => true,
            BoolExpr::Method { object, arg, .. } => {
                object.references_source() || arg.references_source()
            }
            BoolExpr::In { value, list } => {
                value.references_source()
                    || match list {
                        InList::Values(vs) => vs.iter().any(|v| v.references_source()),
                        InList::Param(_) => false,
                    }
            }
            BoolExpr::IsNull { expr, .. } => expr.references_source(),
        }
    }

    pub fn references_synthetic(&self) -> bool {
        match self {
            BoolExpr::Comparison { left, right, .. }
            | BoolExpr::CaseInsensitive { left, right, .. } => {
                left.references_synthetic() || right.references_synthetic()
            }
            BoolExpr::Logical { left, right, .. } => {
                left.references_synthetic() || right.references_synthetic()
            }
            BoolExpr::Not(inner) => inner.references_synthetic(),
            BoolExpr::Constant(_) | BoolExpr::Param(_) => false,
            BoolExpr::Column(c) => c.source == ColumnSource::Synthetic,
            BoolExpr::Method { object, arg, .. } => {
                object.references_synthetic() || arg.references_synthetic()
            }
            BoolExpr::In { value, list } => {
                value.references_synthetic()
                    || match list {
                        InList::Values(vs) => vs.iter().any(|v| v.references_synthetic()),
                        InList::Param(_) => false,
                    }
            }
            BoolExpr::IsNull { expr, .. } => expr.references_synthetic(),
        }
    }
}

impl Selector {
    pub fn contains_window(&self) -> bool {
        match self {
            Selector::Identity => false,
            Selector::Value(v) => v.contains_window(),
            Selector::Object(obj) => obj.entries.iter().any(|e| match e {
                ObjectEntry::Field { value, .. } => value.contains_window(),
                ObjectEntry::Spread { .. } => false,
            }),
        }
    }
}
