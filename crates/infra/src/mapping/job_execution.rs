use batchstore_core::{JobExecution, JobExecutionId, JobInstanceId, JobParameters};

use super::{exit_status, lifecycle_fields, optional_timestamp, required_i64, status};
use crate::concurrency::version_of;
use crate::error::{RepositoryError, RepositoryResult};
use crate::schema::fields;
use crate::store::{Document, Value};

/// Mutable fields of an execution. Id and version are managed by the
/// concurrency helpers.
pub fn to_document(execution: &JobExecution) -> RepositoryResult<Document> {
    let instance_id = execution
        .job_instance_id
        .ok_or_else(|| RepositoryError::validation("JobExecution job instance id cannot be null"))?;

    let mut doc = Document::new();
    doc.insert(fields::JOB_INSTANCE_ID.into(), Value::Int(instance_id.get()));
    doc.insert(fields::CREATE_TIME.into(), Value::from(execution.create_time));
    lifecycle_fields(
        &mut doc,
        execution.status,
        &execution.exit_status,
        execution.start_time,
        execution.end_time,
        execution.last_updated,
    );
    Ok(doc)
}

/// Build an execution from its document.
///
/// `parameters` are the owning instance's parameters if the caller already
/// has them; the result carries `None` otherwise.
pub fn from_document(
    doc: Option<&Document>,
    parameters: Option<JobParameters>,
) -> RepositoryResult<Option<JobExecution>> {
    let Some(doc) = doc else {
        return Ok(None);
    };

    let mut execution = JobExecution::with_id(JobExecutionId::new(required_i64(
        doc,
        fields::JOB_EXECUTION_ID,
    )?));
    execution.job_instance_id = Some(JobInstanceId::new(required_i64(doc, fields::JOB_INSTANCE_ID)?));
    execution.job_parameters = parameters;
    execution.status = status(doc)?;
    execution.exit_status = exit_status(doc);
    execution.create_time = optional_timestamp(doc, fields::CREATE_TIME)?;
    execution.start_time = optional_timestamp(doc, fields::START_TIME)?;
    execution.end_time = optional_timestamp(doc, fields::END_TIME)?;
    execution.last_updated = optional_timestamp(doc, fields::LAST_UPDATED)?;
    execution.version = Some(version_of(doc)?);
    Ok(Some(execution))
}
