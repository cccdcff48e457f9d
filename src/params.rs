//! Named statement parameters.
//!
//! Both halves of the output contract live here: auto-parameters lifted out
//! of the lambda during parsing, and the runtime parameters the caller merges
//! in at `to_sql` time. Names map to owned values; the map is ordered so that
//! parameter records serialize and snapshot deterministically.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<ParamValue>),
    Object(BTreeMap<String, ParamValue>),
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::String(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::String(v)
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(v: Vec<T>) -> Self {
        ParamValue::List(v.into_iter().map(Into::into).collect())
    }
}

/// An ordered name → value record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Params(BTreeMap<String, ParamValue>);

impl Params {
    pub fn new() -> Self {
        Params::default()
    }

    /// Chaining insert, for building literal records in call sites and tests.
    pub fn set<V: Into<ParamValue>>(mut self, name: &str, value: V) -> Self {
        self.insert(name, value.into());
        self
    }

    pub fn insert<V: Into<ParamValue>>(&mut self, name: &str, value: V) {
        self.0.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merges `other` over `self`: on a name collision the entry of `other`
    /// wins.
    pub fn merged_with(&self, other: &Params) -> Params {
        let mut out = self.clone();
        for (name, value) in other.iter() {
            out.insert(name, value.clone());
        }
        out
    }
}

impl<const N: usize> From<[(&str, ParamValue); N]> for Params {
    fn from(entries: [(&str, ParamValue); N]) -> Self {
        let mut params = Params::new();
        for (name, value) in entries {
            params.insert(name, value);
        }
        params
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_merge_precedence() {
        let auto = Params::new().set("__p1", 18).set("min", 1);
        let runtime = Params::new().set("min", 40);

        let merged = auto.merged_with(&runtime);
        assert_eq!(merged.get("min"), Some(&ParamValue::Int(40)));
        assert_eq!(merged.get("__p1"), Some(&ParamValue::Int(18)));
    }
}
