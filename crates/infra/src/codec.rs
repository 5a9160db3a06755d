//! Execution-context and job-parameter codec.
//!
//! Stored field names may not contain `.`, so every `.` in a key is written as
//! the token `{dot}` and turned back on read. Keys that already contain the
//! literal token are rejected: they could not be told apart from escaped dots.
//!
//! The store keeps arbitrary-precision numbers as a generic decimal and forgets
//! whether the application held a decimal or an integer. Context values of
//! either kind get a sibling `<field>_TYPE` string naming the type, which the
//! decoder uses to rebuild the exact variant.
//!
//! ## Layout
//!
//! ```text
//! ExecutionContext { "batch.size": Int(50), "amount": BigDecimal(12.3400) }
//!   ⇒ { "batch{dot}size": Int(50), "amount": Decimal(12.3400), "amount_TYPE": "BigDecimal" }
//! ```

use bigdecimal::BigDecimal;

use batchstore_core::{ContextValue, ExecutionContext, JobParameter, JobParameters};

use crate::error::{RepositoryError, RepositoryResult};
use crate::schema::fields;
use crate::store::{Document, Value, ID_FIELD};

pub const ESCAPE_TOKEN: &str = "{dot}";
pub const TYPE_SUFFIX: &str = "_TYPE";
pub const BIG_DECIMAL_TAG: &str = "BigDecimal";
pub const BIG_INTEGER_TAG: &str = "BigInteger";

/// Fields that live next to the context entries but are not part of them.
const BOOKKEEPING_FIELDS: [&str; 3] = [ID_FIELD, fields::JOB_EXECUTION_ID, fields::STEP_EXECUTION_ID];

/// Field name under which `key` is stored.
pub fn escape_key(key: &str) -> RepositoryResult<String> {
    if key.contains(ESCAPE_TOKEN) {
        return Err(RepositoryError::encoding(format!(
            "key '{key}' contains the reserved token '{ESCAPE_TOKEN}'"
        )));
    }
    if key.is_empty() || key.starts_with('$') {
        return Err(RepositoryError::encoding(format!(
            "key '{key}' cannot be used as a field name"
        )));
    }
    Ok(key.replace('.', ESCAPE_TOKEN))
}

pub fn unescape_key(field: &str) -> String {
    field.replace(ESCAPE_TOKEN, ".")
}

pub fn type_tag_field(field: &str) -> String {
    format!("{field}{TYPE_SUFFIX}")
}

/// NaN and the infinities have no stored form.
fn finite(value: f64, key: &str) -> RepositoryResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(RepositoryError::encoding(format!(
            "key '{key}' holds non-finite number {value}"
        )))
    }
}

/// Encode a context into document fields (without the owner field).
pub fn encode_context(context: &ExecutionContext) -> RepositoryResult<Document> {
    let mut doc = Document::new();
    let mut tags = Vec::new();

    for (key, value) in context.iter() {
        let field = escape_key(key)?;
        if BOOKKEEPING_FIELDS.contains(&field.as_str()) {
            return Err(RepositoryError::encoding(format!(
                "key '{key}' is reserved for bookkeeping"
            )));
        }

        let (stored, tag) = match value {
            ContextValue::String(s) => (Value::String(s.clone()), None),
            ContextValue::Int(v) => (Value::Int(*v), None),
            ContextValue::Float(v) => (Value::Float(finite(*v, key)?), None),
            ContextValue::Timestamp(t) => (Value::Timestamp(*t), None),
            ContextValue::BigDecimal(d) => (Value::Decimal(d.clone()), Some(BIG_DECIMAL_TAG)),
            ContextValue::BigInteger(i) => (
                Value::Decimal(BigDecimal::from(i.clone())),
                Some(BIG_INTEGER_TAG),
            ),
        };
        if let Some(tag) = tag {
            tags.push((type_tag_field(&field), tag));
        }
        doc.insert(field, stored);
    }

    for (field, tag) in tags {
        if doc.insert(field.clone(), Value::from(tag)).is_some() {
            return Err(RepositoryError::encoding(format!(
                "type tag '{field}' collides with a context key"
            )));
        }
    }
    Ok(doc)
}

/// Decode document fields back into a context.
///
/// Bookkeeping fields and type tags are dropped.
pub fn decode_context(doc: &Document) -> RepositoryResult<ExecutionContext> {
    let mut context = ExecutionContext::new();

    for (field, value) in doc {
        if BOOKKEEPING_FIELDS.contains(&field.as_str()) || is_type_tag(doc, field) {
            continue;
        }

        let tag = match (value, doc.get(&type_tag_field(field))) {
            (Value::Decimal(_), Some(Value::String(tag))) => Some(tag.as_str()),
            _ => None,
        };
        let restored = restore(field, value, tag)?;

        let key = unescape_key(field);
        if context.contains_key(&key) {
            return Err(RepositoryError::encoding(format!(
                "stored field '{field}' collides with another field on key '{key}'"
            )));
        }
        context.put(key, restored);
    }
    Ok(context)
}

/// `X_TYPE` only tags `X` when `X` holds a decimal; otherwise it is an
/// ordinary entry that happens to end in the suffix.
fn is_type_tag(doc: &Document, field: &str) -> bool {
    let Some(base) = field.strip_suffix(TYPE_SUFFIX) else {
        return false;
    };
    matches!(doc.get(base), Some(Value::Decimal(_)))
        && matches!(doc.get(field), Some(Value::String(_)))
}

fn restore(field: &str, value: &Value, tag: Option<&str>) -> RepositoryResult<ContextValue> {
    match (value, tag) {
        (Value::Decimal(d), Some(BIG_INTEGER_TAG)) => {
            if !d.is_integer() {
                return Err(RepositoryError::encoding(format!(
                    "field '{field}' is tagged {BIG_INTEGER_TAG} but holds {d}"
                )));
            }
            let (integer, _) = d.with_scale(0).into_bigint_and_exponent();
            Ok(ContextValue::BigInteger(integer))
        }
        (Value::Decimal(d), Some(BIG_DECIMAL_TAG) | None) => Ok(ContextValue::BigDecimal(d.clone())),
        (Value::Decimal(_), Some(other)) => Err(RepositoryError::encoding(format!(
            "field '{field}' carries unknown type tag '{other}'"
        ))),
        (Value::String(s), _) => Ok(ContextValue::String(s.clone())),
        (Value::Int(v), _) => Ok(ContextValue::Int(*v)),
        (Value::Float(v), _) => Ok(ContextValue::Float(*v)),
        (Value::Timestamp(t), _) => Ok(ContextValue::Timestamp(*t)),
        (other, _) => Err(RepositoryError::encoding(format!(
            "field '{field}' holds unsupported {} value",
            other.type_name()
        ))),
    }
}

/// Encode job parameters into the nested `jobParameters` map.
pub fn encode_parameters(parameters: &JobParameters) -> RepositoryResult<Document> {
    let mut doc = Document::new();
    for (key, parameter) in parameters.iter() {
        let value = match parameter {
            JobParameter::String(s) => Value::String(s.clone()),
            JobParameter::Long(v) => Value::Int(*v),
            JobParameter::Double(v) => Value::Float(finite(*v, key)?),
            JobParameter::Date(d) => Value::Timestamp(*d),
        };
        doc.insert(escape_key(key)?, value);
    }
    Ok(doc)
}

pub fn decode_parameters(doc: &Document) -> RepositoryResult<JobParameters> {
    let mut parameters = JobParameters::new();
    for (field, value) in doc {
        let parameter = match value {
            Value::String(s) => JobParameter::String(s.clone()),
            Value::Int(v) => JobParameter::Long(*v),
            Value::Float(v) => JobParameter::Double(*v),
            Value::Timestamp(t) => JobParameter::Date(*t),
            other => {
                return Err(RepositoryError::encoding(format!(
                    "job parameter '{field}' holds unsupported {} value",
                    other.type_name()
                )));
            }
        };
        let key = unescape_key(field);
        if parameters.get(&key).is_some() {
            return Err(RepositoryError::encoding(format!(
                "job parameter '{field}' collides with another parameter on key '{key}'"
            )));
        }
        parameters.insert(key, parameter);
    }
    Ok(parameters)
}
