use batchstore_core::{JobExecutionId, StepExecution, StepExecutionId};

use super::{counter, counter_value, exit_status, lifecycle_fields, optional_timestamp, required_i64, status};
use crate::concurrency::version_of;
use crate::error::{RepositoryError, RepositoryResult};
use crate::schema::fields;
use crate::store::{Document, Value};

pub fn to_document(step: &StepExecution) -> RepositoryResult<Document> {
    let mut doc = Document::new();
    doc.insert(fields::JOB_EXECUTION_ID.into(), Value::Int(step.job_execution_id.get()));
    doc.insert(fields::STEP_NAME.into(), Value::from(step.step_name.as_str()));
    lifecycle_fields(
        &mut doc,
        step.status,
        &step.exit_status,
        step.start_time,
        step.end_time,
        step.last_updated,
    );

    for (field, count) in [
        (fields::COMMIT_COUNT, step.commit_count),
        (fields::READ_COUNT, step.read_count),
        (fields::FILTER_COUNT, step.filter_count),
        (fields::WRITE_COUNT, step.write_count),
        (fields::READ_SKIP_COUNT, step.read_skip_count),
        (fields::WRITE_SKIP_COUNT, step.write_skip_count),
        (fields::PROCESS_SKIP_COUNT, step.process_skip_count),
        (fields::ROLLBACK_COUNT, step.rollback_count),
    ] {
        doc.insert(field.into(), counter_value(field, count)?);
    }
    Ok(doc)
}

pub fn from_document(doc: Option<&Document>) -> RepositoryResult<Option<StepExecution>> {
    let Some(doc) = doc else {
        return Ok(None);
    };

    let step_name = doc
        .get(fields::STEP_NAME)
        .and_then(Value::as_str)
        .ok_or_else(|| RepositoryError::encoding("StepExecution has no step name"))?;

    let mut step = StepExecution::new(
        step_name,
        JobExecutionId::new(required_i64(doc, fields::JOB_EXECUTION_ID)?),
    );
    step.id = Some(StepExecutionId::new(required_i64(doc, fields::STEP_EXECUTION_ID)?));
    step.status = status(doc)?;
    step.exit_status = exit_status(doc);
    step.start_time = optional_timestamp(doc, fields::START_TIME)?;
    step.end_time = optional_timestamp(doc, fields::END_TIME)?;
    step.last_updated = optional_timestamp(doc, fields::LAST_UPDATED)?;
    step.commit_count = counter(doc, fields::COMMIT_COUNT)?;
    step.read_count = counter(doc, fields::READ_COUNT)?;
    step.filter_count = counter(doc, fields::FILTER_COUNT)?;
    step.write_count = counter(doc, fields::WRITE_COUNT)?;
    step.read_skip_count = counter(doc, fields::READ_SKIP_COUNT)?;
    step.write_skip_count = counter(doc, fields::WRITE_SKIP_COUNT)?;
    step.process_skip_count = counter(doc, fields::PROCESS_SKIP_COUNT)?;
    step.rollback_count = counter(doc, fields::ROLLBACK_COUNT)?;
    step.version = Some(version_of(doc)?);
    Ok(Some(step))
}
