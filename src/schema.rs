//! The relation catalog handed to every entry point.
//!
//! A [Schema] is consulted by the visitor only: it decides whether a bare
//! member lowers to a boolean column, whether `+` means concatenation, and
//! whether a deeper member path denotes a JSON path. The SQL emitter never
//! reads it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Bool,
    Int,
    Float,
    Text,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    columns: BTreeMap<String, ColumnType>,
}

impl TableDef {
    pub fn column(&self, name: &str) -> Option<ColumnType> {
        self.columns.get(name).copied()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|n| n.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    tables: BTreeMap<String, TableDef>,
}

impl Schema {
    pub fn new() -> Self {
        Schema::default()
    }

    pub fn table<'a, I>(mut self, name: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, ColumnType)>,
    {
        let columns = columns
            .into_iter()
            .map(|(name, ty)| (name.to_string(), ty))
            .collect();
        self.tables.insert(name.to_string(), TableDef { columns });
        self
    }

    pub fn table_def(&self, name: &str) -> Option<&TableDef> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(|n| n.as_str())
    }
}
