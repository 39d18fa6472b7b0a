//! # EPS Store
//!
//! Persistence for prescription records, documents, and work lists over a
//! single logical table. Records are written with an optimistic concurrency
//! condition on their system change number, index terms travel with the
//! record item, and scheduled-activity queries fan out over the sharded
//! next activity partitions.

pub mod error;
pub mod row;
pub mod store;
pub mod table;

pub use error::{StoreError, StoreResult};
pub use row::{Item, RangeCondition, SecondaryIndex, SortKey};
pub use store::EpsStore;
pub use table::{query_index_yield, InMemoryTable, PageToken, Table};
