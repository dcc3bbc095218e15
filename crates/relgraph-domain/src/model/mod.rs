//! Authorization model types, DSL loader and the indexed type system.
//!
//! This module contains:
//! - Core type definitions (objects, users, tuples, rewrites)
//! - DSL loader for the textual model format
//! - `TypeSystem`, the validated per-version lookup structure
//! - `RelationGraph`, the reverse edges ReverseExpand walks

mod graph;
mod parser;
mod type_system;
mod types;
#[cfg(test)]
mod types_proptest;

pub use graph::{EdgeKind, RelationEdge, RelationGraph};
pub use parser::{parse, ParserError, ParserResult};
pub use type_system::TypeSystem;
pub use types::*;
