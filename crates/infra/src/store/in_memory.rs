use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use uuid::Uuid;

use super::query::{
    push_distinct, validate_document, Filter, FindOptions, IndexSpec, Update, UpdateResult, ID_FIELD,
};
use super::r#trait::{DocumentStore, StoreError};
use super::value::{Document, Value};

type Collections = HashMap<String, Vec<Document>>;

/// In-memory document store.
///
/// Intended for tests/dev. Not optimized for performance: every query is a
/// linear scan. All mutations happen under one write lock, so each call is
/// atomic with respect to concurrent callers.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<Collections>,
    indexes: RwLock<HashMap<String, Vec<IndexSpec>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index definitions registered for a collection.
    pub fn indexes(&self, collection: &str) -> Vec<IndexSpec> {
        self.indexes
            .read()
            .map(|m| m.get(collection).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Collections>, StoreError> {
        self.collections
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Collections>, StoreError> {
        self.collections
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn unique_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>, StoreError> {
        let indexes = self
            .indexes
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(indexes
            .get(collection)
            .map(|specs| specs.iter().filter(|s| s.unique).cloned().collect())
            .unwrap_or_default())
    }

    fn new_id() -> Value {
        Value::String(Uuid::now_v7().to_string())
    }

    /// Reject `candidate` if it collides on a unique index with any document
    /// other than the one at position `replacing`.
    fn check_unique(
        docs: &[Document],
        candidate: &Document,
        replacing: Option<usize>,
        unique: &[IndexSpec],
    ) -> Result<(), StoreError> {
        for spec in unique {
            let clash = docs
                .iter()
                .enumerate()
                .any(|(pos, d)| Some(pos) != replacing && spec.same_key(d, candidate));
            if clash {
                return Err(StoreError::DuplicateKey(spec.name()));
            }
        }
        Ok(())
    }

    /// Shared body of `update_one` and `find_one_and_update`.
    fn update_in_place(
        docs: &mut Vec<Document>,
        filter: &Filter,
        update: &Update,
        upsert: bool,
        unique: &[IndexSpec],
    ) -> Result<(UpdateResult, Option<Document>), StoreError> {
        if let Some(pos) = docs.iter().position(|d| filter.matches(d)) {
            let mut updated = docs[pos].clone();
            let modified = update.apply(&mut updated)?;
            validate_document(&updated)?;
            Self::check_unique(docs, &updated, Some(pos), unique)?;
            docs[pos] = updated.clone();
            let result = UpdateResult {
                matched: 1,
                modified: u64::from(modified),
                upserted: false,
            };
            return Ok((result, Some(updated)));
        }

        if !upsert {
            return Ok((UpdateResult::default(), None));
        }

        let mut seeded = filter.equalities();
        update.apply(&mut seeded)?;
        seeded.insert(ID_FIELD.to_string(), Self::new_id());
        validate_document(&seeded)?;
        Self::check_unique(docs, &seeded, None, unique)?;
        docs.push(seeded.clone());
        let result = UpdateResult {
            matched: 0,
            modified: 0,
            upserted: true,
        };
        Ok((result, Some(seeded)))
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn insert_one(&self, collection: &str, mut doc: Document) -> Result<(), StoreError> {
        validate_document(&doc)?;
        doc.entry(ID_FIELD.to_string()).or_insert_with(Self::new_id);

        let unique = self.unique_indexes(collection)?;
        let mut collections = self.write()?;
        let docs = collections.entry(collection.to_string()).or_default();
        Self::check_unique(docs, &doc, None, &unique)?;
        docs.push(doc);
        Ok(())
    }

    fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Document>, StoreError> {
        let collections = self.read()?;
        let matching: Vec<Document> = collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default();
        Ok(options.apply(matching))
    }

    fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> Result<UpdateResult, StoreError> {
        let unique = self.unique_indexes(collection)?;
        let mut collections = self.write()?;
        let docs = collections.entry(collection.to_string()).or_default();
        let (result, _) = Self::update_in_place(docs, filter, update, upsert, &unique)?;
        Ok(result)
    }

    fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> Result<Option<Document>, StoreError> {
        let unique = self.unique_indexes(collection)?;
        let mut collections = self.write()?;
        let docs = collections.entry(collection.to_string()).or_default();
        let (_, doc) = Self::update_in_place(docs, filter, update, upsert, &unique)?;
        Ok(doc)
    }

    fn replace_one(
        &self,
        collection: &str,
        filter: &Filter,
        mut doc: Document,
        upsert: bool,
    ) -> Result<UpdateResult, StoreError> {
        validate_document(&doc)?;

        let unique = self.unique_indexes(collection)?;
        let mut collections = self.write()?;
        let docs = collections.entry(collection.to_string()).or_default();

        if let Some(pos) = docs.iter().position(|d| filter.matches(d)) {
            let id = docs[pos].get(ID_FIELD).cloned().unwrap_or_else(Self::new_id);
            doc.insert(ID_FIELD.to_string(), id);
            Self::check_unique(docs, &doc, Some(pos), &unique)?;
            let modified = docs[pos] != doc;
            docs[pos] = doc;
            return Ok(UpdateResult {
                matched: 1,
                modified: u64::from(modified),
                upserted: false,
            });
        }

        if !upsert {
            return Ok(UpdateResult::default());
        }

        doc.insert(ID_FIELD.to_string(), Self::new_id());
        Self::check_unique(docs, &doc, None, &unique)?;
        docs.push(doc);
        Ok(UpdateResult {
            matched: 0,
            modified: 0,
            upserted: true,
        })
    }

    fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let collections = self.read()?;
        let n = collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).count())
            .unwrap_or(0);
        Ok(n as u64)
    }

    fn distinct(&self, collection: &str, field: &str, filter: &Filter) -> Result<Vec<Value>, StoreError> {
        let collections = self.read()?;
        let mut out = Vec::new();
        if let Some(docs) = collections.get(collection) {
            for value in docs
                .iter()
                .filter(|d| filter.matches(d))
                .filter_map(|d| d.get(field))
            {
                push_distinct(&mut out, value);
            }
        }
        Ok(out)
    }

    fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<(), StoreError> {
        let mut indexes = self
            .indexes
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        let specs = indexes.entry(collection.to_string()).or_default();
        if !specs.contains(index) {
            specs.push(index.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(fields: &[(&str, Value)]) -> Document {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn insert_assigns_generated_id() {
        let store = InMemoryDocumentStore::new();
        store
            .insert_one("Things", doc(&[("n", Value::Int(1))]))
            .unwrap();

        let found = store
            .find_one("Things", &Filter::eq("n", 1_i64))
            .unwrap()
            .unwrap();
        assert!(matches!(found.get(ID_FIELD), Some(Value::String(_))));
    }

    #[test]
    fn conditional_update_without_upsert_leaves_store_untouched() {
        let store = InMemoryDocumentStore::new();
        store
            .insert_one("Things", doc(&[("id", Value::Int(1)), ("version", Value::Int(2))]))
            .unwrap();

        let stale = Filter::eq("id", 1_i64).and(Filter::eq("version", 1_i64));
        let result = store
            .update_one("Things", &stale, &Update::new().set("version", 2_i64), false)
            .unwrap();
        assert_eq!(result, UpdateResult::default());
        assert_eq!(store.count("Things", &Filter::All).unwrap(), 1);
    }

    #[test]
    fn non_finite_update_is_rejected_and_leaves_document_intact() {
        let store = InMemoryDocumentStore::new();
        store
            .insert_one("Things", doc(&[("id", Value::Int(1)), ("ratio", Value::Float(0.5))]))
            .unwrap();

        let err = store
            .update_one(
                "Things",
                &Filter::eq("id", 1_i64),
                &Update::new().set("ratio", Value::Float(f64::NAN)),
                false,
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidDocument(_)));

        let stored = store.find_one("Things", &Filter::All).unwrap().unwrap();
        assert_eq!(stored.get("ratio"), Some(&Value::Float(0.5)));
        assert!(store
            .insert_one("Things", doc(&[("ratio", Value::Float(f64::NEG_INFINITY))]))
            .is_err());
    }

    #[test]
    fn upsert_seeds_from_filter() {
        let store = InMemoryDocumentStore::new();
        let after = store
            .find_one_and_update(
                "Sequences",
                &Filter::eq("name", "JobInstance"),
                &Update::new().inc("value", 1),
                true,
            )
            .unwrap()
            .unwrap();
        assert_eq!(after.get("name"), Some(&Value::from("JobInstance")));
        assert_eq!(after.get("value"), Some(&Value::Int(1)));
    }

    #[test]
    fn replace_drops_fields_and_keeps_id() {
        let store = InMemoryDocumentStore::new();
        store
            .insert_one("Ctx", doc(&[("owner", Value::Int(1)), ("stale", Value::Int(9))]))
            .unwrap();
        let before = store.find_one("Ctx", &Filter::All).unwrap().unwrap();

        store
            .replace_one(
                "Ctx",
                &Filter::eq("owner", 1_i64),
                doc(&[("owner", Value::Int(1)), ("fresh", Value::Int(3))]),
                true,
            )
            .unwrap();

        let after = store.find_one("Ctx", &Filter::All).unwrap().unwrap();
        assert!(!after.contains_key("stale"));
        assert_eq!(after.get(ID_FIELD), before.get(ID_FIELD));
    }

    #[test]
    fn rejects_dotted_field_names() {
        let store = InMemoryDocumentStore::new();
        let err = store
            .insert_one("Things", doc(&[("a.b", Value::Int(1))]))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidDocument(_)));
    }

    #[test]
    fn distinct_deduplicates() {
        let store = InMemoryDocumentStore::new();
        for name in ["b", "a", "b"] {
            store
                .insert_one("Jobs", doc(&[("jobName", Value::from(name))]))
                .unwrap();
        }
        let names = store.distinct("Jobs", "jobName", &Filter::All).unwrap();
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn unique_index_rejects_second_document() {
        let store = InMemoryDocumentStore::new();
        store
            .create_index("Jobs", &IndexSpec::asc("jobName").then_asc("jobKey").unique())
            .unwrap();
        let job = doc(&[("jobName", Value::from("j")), ("jobKey", Value::from("k"))]);
        store.insert_one("Jobs", job.clone()).unwrap();

        let err = store.insert_one("Jobs", job).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(_)));
        assert_eq!(store.count("Jobs", &Filter::All).unwrap(), 1);
    }

    #[test]
    fn create_index_is_idempotent() {
        let store = InMemoryDocumentStore::new();
        store.create_index("Jobs", &IndexSpec::desc("jobName")).unwrap();
        store.create_index("Jobs", &IndexSpec::desc("jobName")).unwrap();
        assert_eq!(store.indexes("Jobs").len(), 1);
    }
}
