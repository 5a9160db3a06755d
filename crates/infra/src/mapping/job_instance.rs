use batchstore_core::{JobInstance, JobInstanceId, JobParameters};

use super::required_i64;
use crate::codec::{decode_parameters, encode_parameters};
use crate::concurrency::version_of;
use crate::error::{RepositoryError, RepositoryResult};
use crate::schema::fields;
use crate::store::{Document, Value};

/// Fields of a new instance; id and version are added on create.
pub fn to_document(job_name: &str, job_key: &str, parameters: &JobParameters) -> RepositoryResult<Document> {
    let mut doc = Document::new();
    doc.insert(fields::JOB_NAME.into(), Value::from(job_name));
    doc.insert(fields::JOB_KEY.into(), Value::from(job_key));
    doc.insert(
        fields::JOB_PARAMETERS.into(),
        Value::Map(encode_parameters(parameters)?),
    );
    Ok(doc)
}

pub fn from_document(doc: Option<&Document>) -> RepositoryResult<Option<JobInstance>> {
    let Some(doc) = doc else {
        return Ok(None);
    };

    let job_name = doc
        .get(fields::JOB_NAME)
        .and_then(Value::as_str)
        .ok_or_else(|| RepositoryError::encoding("JobInstance has no job name"))?;

    Ok(Some(JobInstance {
        id: JobInstanceId::new(required_i64(doc, fields::JOB_INSTANCE_ID)?),
        job_name: job_name.to_string(),
        parameters: parameters_of(doc)?,
        job_key: super::string_or_default(doc, fields::JOB_KEY),
        version: version_of(doc)?,
    }))
}

/// Decoded `jobParameters` of a stored instance; missing means empty.
pub fn parameters_of(doc: &Document) -> RepositoryResult<JobParameters> {
    match doc.get(fields::JOB_PARAMETERS) {
        None | Some(Value::Null) => Ok(JobParameters::new()),
        Some(Value::Map(map)) => decode_parameters(map),
        Some(other) => Err(RepositoryError::encoding(format!(
            "jobParameters holds {} instead of a map",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_document_maps_to_none() {
        assert!(from_document(None).unwrap().is_none());
    }

    #[test]
    fn stored_instance_round_trips() {
        let params = JobParameters::new().with("run.date", "2024-01-01");
        let mut doc = to_document("ImportJob", "abc", &params).unwrap();
        doc.insert(fields::JOB_INSTANCE_ID.into(), Value::Int(7));
        doc.insert(fields::VERSION.into(), Value::Int(1));

        let instance = from_document(Some(&doc)).unwrap().unwrap();
        assert_eq!(instance.id, JobInstanceId::new(7));
        assert_eq!(instance.job_name, "ImportJob");
        assert_eq!(instance.job_key, "abc");
        assert_eq!(instance.parameters, params);
        assert_eq!(instance.version, 1);
    }
}
