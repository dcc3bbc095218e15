//! relgraph-domain: Core authorization domain logic
//!
//! This crate contains the core authorization logic including:
//! - Authorization model types, the DSL loader and the relation graph
//! - Model validation
//! - Graph resolvers for Check, Expand, ListObjects and ListUsers
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               relgraph-domain               │
//! ├─────────────────────────────────────────────┤
//! │  model/      - Types, DSL loader, graph     │
//! │  validation/ - Model validation             │
//! │  resolver/   - Graph resolution engine      │
//! └─────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod model;
pub mod resolver;
pub mod validation;

// Re-export commonly used types at the crate root
pub use error::{DomainError, DomainResult, ErrorCode};
pub use model::TypeSystem;
pub use resolver::{GraphResolver, ResolverConfig};
