//! Graph resolver for permission queries.
//!
//! Check, Expand, ListObjects (ReverseExpand) and ListUsers over one pinned
//! model version, reading tuples through [`TupleReader`] and models through
//! [`ModelReader`].

mod check;
mod config;
mod context;
mod evaluator;
mod expand;
mod graph_resolver;
mod list_objects;
mod list_users;
mod reverse_expand;
mod traits;
mod types;

#[cfg(test)]
mod tests;

pub use config::ResolverConfig;
pub use graph_resolver::GraphResolver;
pub use reverse_expand::ObjectStream;
pub use traits::{ModelReader, PageRequest, TuplePage, TupleReader};
pub use types::*;
