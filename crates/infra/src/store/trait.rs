use std::sync::Arc;

use thiserror::Error;

use super::query::{Filter, FindOptions, IndexSpec, Update, UpdateResult};
use super::value::{Document, Value};

/// Backing store operation error.
///
/// These are **infrastructure errors**: they say nothing about the entities
/// being stored, only that the store could not perform the operation.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store could not be reached (connection loss, timeout, pool
    /// exhaustion). No partial state is assumed committed; safe to retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected a document (illegal field name, bad increment).
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// A unique index rejected the write.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Any other backend failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Collection-oriented document store.
///
/// The repository layer is written against this trait only. Every call is a
/// blocking round trip; implementations must make each single call atomic
/// with respect to concurrent callers (in particular `update_one` with a
/// filter and `find_one_and_update`), which is what the optimistic
/// concurrency and sequence allocation are built on.
///
/// ## Implementation Requirements
///
/// - assign a generated `_id` to every inserted or upserted document
/// - reject field names containing `.` or starting with `$`
/// - `find_one_and_update` returns the document **after** the update
/// - `replace_one` keeps the `_id` of the document it replaces
pub trait DocumentStore: Send + Sync {
    fn insert_one(&self, collection: &str, doc: Document) -> Result<(), StoreError>;

    fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Document>, StoreError>;

    fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>, StoreError> {
        let mut docs = self.find(collection, filter, &FindOptions::new().limit(1))?;
        Ok(docs.pop())
    }

    /// Update the first matching document; insert a seeded one when nothing
    /// matches and `upsert` is set.
    fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> Result<UpdateResult, StoreError>;

    /// Atomically update the first matching document and return it as it is
    /// after the update.
    fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> Result<Option<Document>, StoreError>;

    /// Replace the first matching document wholesale.
    fn replace_one(
        &self,
        collection: &str,
        filter: &Filter,
        doc: Document,
        upsert: bool,
    ) -> Result<UpdateResult, StoreError>;

    fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;

    /// Distinct values of `field` among matching documents (unordered).
    fn distinct(&self, collection: &str, field: &str, filter: &Filter) -> Result<Vec<Value>, StoreError>;

    fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<(), StoreError>;
}

impl<S> DocumentStore for Arc<S>
where
    S: DocumentStore + ?Sized,
{
    fn insert_one(&self, collection: &str, doc: Document) -> Result<(), StoreError> {
        (**self).insert_one(collection, doc)
    }

    fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Document>, StoreError> {
        (**self).find(collection, filter, options)
    }

    fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>, StoreError> {
        (**self).find_one(collection, filter)
    }

    fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> Result<UpdateResult, StoreError> {
        (**self).update_one(collection, filter, update, upsert)
    }

    fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> Result<Option<Document>, StoreError> {
        (**self).find_one_and_update(collection, filter, update, upsert)
    }

    fn replace_one(
        &self,
        collection: &str,
        filter: &Filter,
        doc: Document,
        upsert: bool,
    ) -> Result<UpdateResult, StoreError> {
        (**self).replace_one(collection, filter, doc, upsert)
    }

    fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        (**self).count(collection, filter)
    }

    fn distinct(&self, collection: &str, field: &str, filter: &Filter) -> Result<Vec<Value>, StoreError> {
        (**self).distinct(collection, field, filter)
    }

    fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<(), StoreError> {
        (**self).create_index(collection, index)
    }
}
