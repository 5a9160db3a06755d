//! Entity ⇄ document mapping.
//!
//! Each mapper turns an entity into the fields it owns (`to_document`) and
//! back (`from_document`). `from_document` accepts `None` and returns
//! `Ok(None)` so lookups can be piped through it directly.
//!
//! Mappers never touch the store. Where a mapped entity needs data from
//! another collection (a job execution's parameters), the caller passes it in.

pub mod job_execution;
pub mod job_instance;
pub mod step_execution;

use chrono::{DateTime, Utc};

use batchstore_core::{BatchStatus, ExitStatus};

use crate::error::{RepositoryError, RepositoryResult};
use crate::schema::fields;
use crate::store::{Document, Value};

pub(crate) fn required_i64(doc: &Document, field: &str) -> RepositoryResult<i64> {
    doc.get(field)
        .and_then(Value::as_i64)
        .ok_or_else(|| RepositoryError::encoding(format!("field '{field}' is missing or not an integer")))
}

pub(crate) fn optional_timestamp(doc: &Document, field: &str) -> RepositoryResult<Option<DateTime<Utc>>> {
    match doc.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Timestamp(t)) => Ok(Some(*t)),
        Some(other) => Err(RepositoryError::encoding(format!(
            "field '{field}' holds {} instead of a timestamp",
            other.type_name()
        ))),
    }
}

pub(crate) fn string_or_default(doc: &Document, field: &str) -> String {
    doc.get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Non-negative progress counter; a missing counter reads as zero.
pub(crate) fn counter(doc: &Document, field: &str) -> RepositoryResult<u64> {
    match doc.get(field) {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Int(v)) => u64::try_from(*v)
            .map_err(|_| RepositoryError::encoding(format!("counter '{field}' is negative: {v}"))),
        Some(other) => Err(RepositoryError::encoding(format!(
            "counter '{field}' holds {} instead of an integer",
            other.type_name()
        ))),
    }
}

pub(crate) fn counter_value(field: &str, count: u64) -> RepositoryResult<Value> {
    i64::try_from(count)
        .map(Value::Int)
        .map_err(|_| RepositoryError::encoding(format!("counter '{field}' exceeds the storable range")))
}

pub(crate) fn status(doc: &Document) -> RepositoryResult<BatchStatus> {
    let raw = doc
        .get(fields::STATUS)
        .and_then(Value::as_str)
        .ok_or_else(|| RepositoryError::encoding("status is missing"))?;
    raw.parse()
        .map_err(|e| RepositoryError::encoding(format!("{e}")))
}

pub(crate) fn exit_status(doc: &Document) -> ExitStatus {
    ExitStatus::new(
        string_or_default(doc, fields::EXIT_CODE),
        string_or_default(doc, fields::EXIT_MESSAGE),
    )
}

/// Status, exit status and time fields shared by job and step executions.
pub(crate) fn lifecycle_fields(
    doc: &mut Document,
    status: BatchStatus,
    exit: &ExitStatus,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    last_updated: Option<DateTime<Utc>>,
) {
    doc.insert(fields::STATUS.into(), Value::from(status.as_str()));
    doc.insert(fields::EXIT_CODE.into(), Value::from(exit.exit_code.as_str()));
    doc.insert(fields::EXIT_MESSAGE.into(), Value::from(exit.exit_description.as_str()));
    doc.insert(fields::START_TIME.into(), Value::from(start_time));
    doc.insert(fields::END_TIME.into(), Value::from(end_time));
    doc.insert(fields::LAST_UPDATED.into(), Value::from(last_updated));
}
