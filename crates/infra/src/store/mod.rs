//! Document store boundary.
//!
//! This module defines the collection-level operations the repositories need
//! from a schemaless document store, plus two backends: an in-memory store for
//! tests/dev and a Postgres JSONB store for durable deployments.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod query;
pub mod r#trait;
pub mod value;

pub use in_memory::InMemoryDocumentStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresDocumentStore;
pub use query::{Filter, FindOptions, IndexSpec, SortOrder, Update, UpdateResult, ID_FIELD};
pub use r#trait::{DocumentStore, StoreError};
pub use value::{Document, Value};
