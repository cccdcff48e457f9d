//! Syntax tree and intermediate representations.
//!
//! `source` is what the parser produces; `expr`, `ops` and `shape` together
//! form the resolved IR that the visitor builds and the emitter consumes.

pub mod expr;
pub mod ops;
pub mod shape;
pub mod source;
