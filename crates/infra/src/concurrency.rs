//! Versioned writes.
//!
//! Two paths:
//!
//! - [`create`] allocates an id from the sequence and inserts the document at
//!   [`INITIAL_VERSION`].
//! - [`compare_and_swap`] issues one conditional update filtered on
//!   `id == id AND version == expected` that also sets `version = expected + 1`.
//!   It never upserts: a stale version matches nothing and is reported as
//!   [`RepositoryError::ConcurrencyConflict`], leaving the stored document as
//!   it was.
//!
//! Callers advance their in-memory version to the returned value.

use tracing::{debug, warn};

use batchstore_core::{Entity, ExpectedVersion, INITIAL_VERSION};

use crate::error::{RepositoryError, RepositoryResult};
use crate::schema::fields;
use crate::sequence::next_id;
use crate::store::{Document, DocumentStore, Filter, Update, Value};

/// Where a versioned entity lives and how it is keyed.
#[derive(Debug, Clone, Copy)]
pub struct VersionedCollection {
    pub entity: &'static str,
    pub collection: &'static str,
    pub id_field: &'static str,
    /// Sequence kind the ids are drawn from.
    pub sequence: &'static str,
}

impl VersionedCollection {
    pub fn by_id(&self, id: i64) -> Filter {
        Filter::eq(self.id_field, id)
    }
}

/// Reject saving an entity that already carries an id or a version.
pub fn check_unsaved<E: Entity>(entity: &E) -> RepositoryResult<()> {
    if let Some(id) = entity.id() {
        return Err(RepositoryError::validation(format!(
            "{} {id} is already saved",
            E::KIND
        )));
    }
    if ExpectedVersion::of(entity.version()) != ExpectedVersion::Absent {
        return Err(RepositoryError::validation(format!(
            "{} without id cannot carry a version",
            E::KIND
        )));
    }
    Ok(())
}

/// Id and expected version of an entity about to be updated.
pub fn update_target<E: Entity>(entity: &E) -> RepositoryResult<(E::Id, u32)> {
    let id = entity.id().ok_or_else(|| {
        RepositoryError::validation(format!("{} has no id; save it first", E::KIND))
    })?;
    match ExpectedVersion::of(entity.version()) {
        ExpectedVersion::Exact(expected) => Ok((id, expected)),
        ExpectedVersion::Absent => Err(RepositoryError::validation(format!(
            "{} version cannot be null",
            E::KIND
        ))),
    }
}

/// Insert a new entity. Returns the allocated id and the stored version.
pub fn create<S>(
    store: &S,
    target: &VersionedCollection,
    mut doc: Document,
) -> RepositoryResult<(i64, u32)>
where
    S: DocumentStore + ?Sized,
{
    let id = next_id(store, target.sequence)?;
    doc.insert(target.id_field.to_string(), Value::Int(id));
    doc.insert(fields::VERSION.to_string(), Value::from(INITIAL_VERSION));
    store.insert_one(target.collection, doc)?;

    debug!(entity = target.entity, id, version = INITIAL_VERSION, "created");
    Ok((id, INITIAL_VERSION))
}

/// Apply `changes` if the stored version is still `expected`.
///
/// Returns the new version.
pub fn compare_and_swap<S>(
    store: &S,
    target: &VersionedCollection,
    id: i64,
    expected: u32,
    changes: Document,
) -> RepositoryResult<u32>
where
    S: DocumentStore + ?Sized,
{
    let expectation = ExpectedVersion::Exact(expected);
    let next = expectation
        .next()
        .ok_or_else(|| RepositoryError::inconsistency(format!("{} {id} version overflow", target.entity)))?;

    let filter = target
        .by_id(id)
        .and(Filter::eq(fields::VERSION, expected));
    let update = Update::new()
        .set_all(changes)
        .set(fields::VERSION, next);

    let result = store.update_one(target.collection, &filter, &update, false)?;
    if result.matched == 0 {
        let actual = stored_version(store, target, id)?;
        warn!(
            entity = target.entity,
            id,
            expected,
            actual = ?actual,
            "optimistic concurrency conflict"
        );
        return Err(RepositoryError::ConcurrencyConflict {
            entity: target.entity,
            id,
            expected,
            actual,
        });
    }

    debug!(entity = target.entity, id, version = next, "updated");
    Ok(next)
}

/// Current stored version of an entity, `None` if no document exists.
pub fn stored_version<S>(
    store: &S,
    target: &VersionedCollection,
    id: i64,
) -> RepositoryResult<Option<u32>>
where
    S: DocumentStore + ?Sized,
{
    let Some(doc) = store.find_one(target.collection, &target.by_id(id))? else {
        return Ok(None);
    };
    version_of(&doc).map(Some)
}

/// The `version` field of a stored document.
pub fn version_of(doc: &Document) -> RepositoryResult<u32> {
    doc.get(fields::VERSION)
        .and_then(Value::as_i64)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| RepositoryError::encoding("stored document has no valid version"))
}
