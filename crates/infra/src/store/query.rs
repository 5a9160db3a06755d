//! Filters, updates and find options understood by every document store.
//!
//! The semantics follow the usual document-database conventions so that the
//! in-memory and SQL backends agree:
//! - `Eq(field, Null)` matches documents where the field is null **or missing**
//! - an upsert seeds the new document with the filter's equality fields before
//!   applying the update
//! - field names must not contain `.` and must not start with `$`

use std::cmp::Ordering;

use super::r#trait::StoreError;
use super::value::{Document, Value};

/// Generated identifier field present on every stored document.
pub const ID_FIELD: &str = "_id";

/// Document selection predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Eq(String, Value),
    In(String, Vec<Value>),
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn is_in<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(field.into(), values.into_iter().map(Into::into).collect())
    }

    /// Conjunction of `self` and `other`.
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut a), Filter::And(b)) => {
                a.extend(b);
                Filter::And(a)
            }
            (Filter::And(mut a), f) => {
                a.push(f);
                Filter::And(a)
            }
            (f, Filter::And(mut b)) => {
                b.insert(0, f);
                Filter::And(b)
            }
            (a, b) => Filter::And(vec![a, b]),
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, expected) => field_equals(doc, field, expected),
            Filter::In(field, candidates) => candidates
                .iter()
                .any(|expected| field_equals(doc, field, expected)),
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
        }
    }

    /// Equality constraints that can be copied into an upserted document.
    pub fn equalities(&self) -> Document {
        let mut seed = Document::new();
        self.collect_equalities(&mut seed);
        seed
    }

    fn collect_equalities(&self, seed: &mut Document) {
        match self {
            Filter::Eq(field, value) => {
                seed.insert(field.clone(), value.clone());
            }
            Filter::And(filters) => filters.iter().for_each(|f| f.collect_equalities(seed)),
            Filter::All | Filter::In(..) => {}
        }
    }
}

fn field_equals(doc: &Document, field: &str, expected: &Value) -> bool {
    match doc.get(field) {
        Some(actual) => actual.compare(expected) == Ordering::Equal,
        None => expected.is_null(),
    }
}

/// Field-level modification applied by `update_one`/`find_one_and_update`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    set: Document,
    inc: Vec<(String, i64)>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field to a value (`$set`).
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(field.into(), value.into());
        self
    }

    /// Set every field of `fields`.
    pub fn set_all(mut self, fields: Document) -> Self {
        self.set.extend(fields);
        self
    }

    /// Increment an integer field, treating a missing field as 0 (`$inc`).
    pub fn inc(mut self, field: impl Into<String>, by: i64) -> Self {
        self.inc.push((field.into(), by));
        self
    }

    /// Apply to `doc`; returns whether anything changed.
    pub fn apply(&self, doc: &mut Document) -> Result<bool, StoreError> {
        let before = doc.clone();
        for (field, value) in &self.set {
            doc.insert(field.clone(), value.clone());
        }
        for (field, by) in &self.inc {
            let current = match doc.get(field) {
                None | Some(Value::Null) => 0,
                Some(Value::Int(v)) => *v,
                Some(other) => {
                    return Err(StoreError::InvalidDocument(format!(
                        "cannot increment non-integer field '{field}' of type {}",
                        other.type_name()
                    )));
                }
            };
            let next = current.checked_add(*by).ok_or_else(|| {
                StoreError::InvalidDocument(format!("increment of '{field}' overflows"))
            })?;
            doc.insert(field.clone(), Value::Int(next));
        }
        Ok(*doc != before)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Sorting and paging of a `find`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Vec<(String, SortOrder)>,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort_asc(mut self, field: impl Into<String>) -> Self {
        self.sort.push((field.into(), SortOrder::Ascending));
        self
    }

    pub fn sort_desc(mut self, field: impl Into<String>) -> Self {
        self.sort.push((field.into(), SortOrder::Descending));
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sort, skip and truncate an already filtered result set.
    pub fn apply(&self, mut docs: Vec<Document>) -> Vec<Document> {
        if !self.sort.is_empty() {
            docs.sort_by(|a, b| self.compare(a, b));
        }
        let iter = docs.into_iter().skip(self.skip);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }

    fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for (field, order) in &self.sort {
            let va = a.get(field).unwrap_or(&Value::Null);
            let vb = b.get(field).unwrap_or(&Value::Null);
            let ord = match order {
                SortOrder::Ascending => va.compare(vb),
                SortOrder::Descending => vb.compare(va),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// Secondary index definition (single or compound).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub keys: Vec<(String, SortOrder)>,
    /// Reject a second document with equal values for every key field.
    pub unique: bool,
}

impl IndexSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            keys: vec![(field.into(), SortOrder::Ascending)],
            unique: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            keys: vec![(field.into(), SortOrder::Descending)],
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Whether two documents agree on every key field of this index.
    ///
    /// Documents missing any key field never conflict.
    pub fn same_key(&self, a: &Document, b: &Document) -> bool {
        self.keys.iter().all(|(field, _)| match (a.get(field), b.get(field)) {
            (Some(x), Some(y)) => x.compare(y) == Ordering::Equal,
            _ => false,
        })
    }

    pub fn then_asc(mut self, field: impl Into<String>) -> Self {
        self.keys.push((field.into(), SortOrder::Ascending));
        self
    }

    /// Conventional index name, e.g. `stepExecutionId_1_jobExecutionId_1`.
    pub fn name(&self) -> String {
        self.keys
            .iter()
            .map(|(field, order)| match order {
                SortOrder::Ascending => format!("{field}_1"),
                SortOrder::Descending => format!("{field}_-1"),
            })
            .collect::<Vec<_>>()
            .join("_")
    }
}

/// Outcome of an `update_one`/`replace_one`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub matched: u64,
    pub modified: u64,
    pub upserted: bool,
}

/// Reject field names and numbers the store cannot hold.
pub fn validate_document(doc: &Document) -> Result<(), StoreError> {
    for (field, value) in doc {
        if field.is_empty() || field.contains('.') || field.starts_with('$') {
            return Err(StoreError::InvalidDocument(format!(
                "illegal field name '{field}'"
            )));
        }
        match value {
            Value::Map(nested) => validate_document(nested)?,
            Value::Float(f) if !f.is_finite() => {
                return Err(StoreError::InvalidDocument(format!(
                    "field '{field}' holds non-finite number {f}"
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Push `value` into `out` unless an equal value is already present.
pub(crate) fn push_distinct(out: &mut Vec<Value>, value: &Value) {
    if !out
        .iter()
        .any(|v| v.compare(value) == Ordering::Equal)
    {
        out.push(value.clone());
    }
}
