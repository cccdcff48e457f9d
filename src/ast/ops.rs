//! Operation tree: the linear relational IR for one statement.
//!
//! Chainable operations hold a `source` back-pointer; the terminal marks the
//! statement's return kind. Mutations share the expression layer but have
//! their own statement roots, since they take a different emitter path.

use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};

use super::expr::{BoolExpr, ObjectExpr, ParamRef, Selector, ValueExpr};
use super::shape::Shape;

/// The root of a parsed plan.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Query {
    pub kind: QueryKind,
    /// Base-table names in discovery order; index `n` is aliased `tn`
    /// whenever the statement references more than one table.
    pub tables: Vec<String>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, EnumAsInner)]
pub enum QueryKind {
    Select(SelectQuery),
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SelectQuery {
    pub source: Operation,
    pub terminal: Terminal,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, EnumAsInner)]
pub enum Operation {
    From(FromOp),
    Where {
        source: Box<Operation>,
        predicate: BoolExpr,
    },
    Select {
        source: Box<Operation>,
        selector: Selector,
        shape: Option<Shape>,
    },
    Join(JoinOp),
    GroupBy {
        source: Box<Operation>,
        key: ValueExpr,
    },
    OrderBy {
        source: Box<Operation>,
        key: ValueExpr,
        descending: bool,
    },
    ThenBy {
        source: Box<Operation>,
        key: ValueExpr,
        descending: bool,
    },
    Skip {
        source: Box<Operation>,
        count: CountOperand,
    },
    Take {
        source: Box<Operation>,
        count: CountOperand,
    },
    Distinct {
        source: Box<Operation>,
    },
    Reverse {
        source: Box<Operation>,
    },
}

impl Operation {
    pub fn source(&self) -> Option<&Operation> {
        match self {
            Operation::From(_) => None,
            Operation::Where { source, .. }
            | Operation::Select { source, .. }
            | Operation::GroupBy { source, .. }
            | Operation::OrderBy { source, .. }
            | Operation::ThenBy { source, .. }
            | Operation::Skip { source, .. }
            | Operation::Take { source, .. }
            | Operation::Distinct { source }
            | Operation::Reverse { source } => Some(source),
            Operation::Join(join) => Some(&join.source),
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct FromOp {
    pub table: String,
    /// Discovery index into [Query::tables].
    pub index: usize,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct JoinOp {
    pub source: Box<Operation>,
    pub inner: Box<Operation>,
    pub outer_key: ValueExpr,
    pub inner_key: ValueExpr,
    pub selector: ObjectExpr,
    pub shape: Shape,
    pub kind: JoinKind,
}

/// A `take`/`skip` count: a named parameter (lambda literals are lifted like
/// any other literal) or a structural number minted by terminal lowering.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, EnumAsInner)]
pub enum CountOperand {
    Value(i64),
    Param(ParamRef),
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, EnumAsInner)]
pub enum Terminal {
    /// Row stream; the default when a chain just ends.
    ToArray,
    ToList,
    First {
        predicate: Option<BoolExpr>,
        or_default: bool,
    },
    Single {
        predicate: Option<BoolExpr>,
        or_default: bool,
    },
    Last {
        predicate: Option<BoolExpr>,
        or_default: bool,
    },
    Any {
        predicate: Option<BoolExpr>,
    },
    All {
        predicate: BoolExpr,
    },
    Contains {
        value: ValueExpr,
    },
    Count {
        predicate: Option<BoolExpr>,
    },
    Sum {
        selector: Option<ValueExpr>,
    },
    Average {
        selector: Option<ValueExpr>,
    },
    Min {
        selector: Option<ValueExpr>,
    },
    Max {
        selector: Option<ValueExpr>,
    },
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct InsertStatement {
    pub table: String,
    pub values: ObjectExpr,
    pub returning: Option<Selector>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct UpdateStatement {
    pub table: String,
    pub assignments: ObjectExpr,
    pub predicate: Option<BoolExpr>,
    pub allow_full_table: bool,
    pub returning: Option<Selector>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct DeleteStatement {
    pub table: String,
    pub predicate: Option<BoolExpr>,
    pub allow_full_table: bool,
    pub returning: Option<Selector>,
}
