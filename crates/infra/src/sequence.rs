//! Per-kind integer id allocation.
//!
//! One counter document per kind lives in the `Sequences` collection, shaped
//! `{name, value}`. Allocation is a single `find_one_and_update` that
//! increments `value` and returns the document as it is after the increment,
//! so the returned value is the one this caller's increment produced. The
//! counter document is created on first use.

use tracing::debug;

use crate::error::{RepositoryError, RepositoryResult};
use crate::schema::{collections, fields};
use crate::store::{DocumentStore, Filter, Update, Value};

/// Allocate the next id of `kind`.
///
/// Ids of one kind are never handed out twice. A store error means no id was
/// reserved; a failed call may still leave a gap in the sequence.
pub fn next_id<S>(store: &S, kind: &str) -> RepositoryResult<i64>
where
    S: DocumentStore + ?Sized,
{
    let after = store
        .find_one_and_update(
            collections::SEQUENCES,
            &Filter::eq(fields::SEQUENCE_NAME, kind),
            &Update::new().inc(fields::SEQUENCE_VALUE, 1),
            true,
        )?
        .ok_or_else(|| {
            RepositoryError::inconsistency(format!("sequence '{kind}' was not created by upsert"))
        })?;

    let id = after
        .get(fields::SEQUENCE_VALUE)
        .and_then(Value::as_i64)
        .ok_or_else(|| {
            RepositoryError::inconsistency(format!("sequence '{kind}' holds a non-integer value"))
        })?;

    debug!(kind, id, "allocated id");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDocumentStore;

    #[test]
    fn first_id_is_one_and_kinds_are_independent() {
        let store = InMemoryDocumentStore::new();
        assert_eq!(next_id(&store, "JobInstance").unwrap(), 1);
        assert_eq!(next_id(&store, "JobInstance").unwrap(), 2);
        assert_eq!(next_id(&store, "JobExecution").unwrap(), 1);
        assert_eq!(store.count(collections::SEQUENCES, &Filter::All).unwrap(), 2);
    }

    #[test]
    fn corrupted_counter_is_reported() {
        let store = InMemoryDocumentStore::new();
        let mut doc = crate::store::Document::new();
        doc.insert(fields::SEQUENCE_NAME.into(), Value::from("Foo"));
        doc.insert(fields::SEQUENCE_VALUE.into(), Value::from("seven"));
        store.insert_one(collections::SEQUENCES, doc).unwrap();

        // `$inc` on a string is rejected by the store itself.
        let err = next_id(&store, "Foo").unwrap_err();
        assert!(matches!(err, RepositoryError::Store(_)));
    }
}
