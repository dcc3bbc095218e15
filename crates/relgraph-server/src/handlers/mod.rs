//! Command handlers behind the service facade.
//!
//! Queries (Check, Expand, ListObjects, ListUsers) go straight to the graph
//! resolver; everything that validates input against a model or pages over
//! the datastore lives here.

mod assertions;
mod models;
mod read;
mod stores;
mod write;

pub use assertions::{Assertion, AssertionHandler};
pub use models::{ModelHandler, ModelPage};
pub use read::{
    page_size, ChangePage, ReadFilter, ReadHandler, TupleChangeEntry, TuplePage, MAX_PAGE_SIZE,
};
pub use stores::{StoreHandler, StorePage};
pub use write::{WriteHandler, WriteRequest};
