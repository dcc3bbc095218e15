//! relgraph-storage: Storage abstraction layer
//!
//! This crate provides the datastore collaborator the relgraph engine reads
//! tuples and models through:
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                 relgraph-storage                 │
//! ├──────────────────────────────────────────────────┤
//! │  traits.rs       - DataStore trait, tokens       │
//! │  memory.rs       - In-memory implementation      │
//! │  instrumented.rs - Call metrics decorator        │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod instrumented;
pub mod memory;
pub mod traits;

pub use error::{StorageError, StorageResult};
pub use instrumented::InstrumentedDataStore;
pub use memory::MemoryDataStore;
pub use traits::{
    DataStore, PaginatedResult, PaginationOptions, Store, StoredAssertion,
    StoredAuthorizationModel, StoredTuple, TupleChange, TupleFilter, TupleOperation,
};
