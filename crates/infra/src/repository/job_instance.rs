use tracing::{debug, warn};

use batchstore_core::{Entity, JobExecutionId, JobInstance, JobInstanceId, JobParameters};

use super::JobInstanceRepository;
use crate::concurrency::{self, VersionedCollection};
use crate::error::{RepositoryError, RepositoryResult};
use crate::job_key::fingerprint;
use crate::mapping::job_instance::{from_document, parameters_of, to_document};
use crate::schema::{collections, fields, sequences};
use crate::store::{DocumentStore, Filter, FindOptions, IndexSpec, StoreError, Value};

pub(crate) const INSTANCES: VersionedCollection = VersionedCollection {
    entity: JobInstance::KIND,
    collection: collections::JOB_INSTANCE,
    id_field: fields::JOB_INSTANCE_ID,
    sequence: sequences::JOB_INSTANCE,
};

/// Document-backed [`JobInstanceRepository`].
#[derive(Debug, Clone)]
pub struct DocumentJobInstanceRepository<S> {
    store: S,
}

impl<S: DocumentStore> DocumentJobInstanceRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn ensure_indexes(&self) -> RepositoryResult<()> {
        for index in [
            IndexSpec::desc(fields::JOB_NAME),
            IndexSpec::asc(fields::JOB_INSTANCE_ID),
            IndexSpec::asc(fields::JOB_NAME).then_asc(fields::JOB_KEY).unique(),
        ] {
            self.store.create_index(collections::JOB_INSTANCE, &index)?;
        }
        Ok(())
    }

    fn by_name_and_key(job_name: &str, job_key: &str) -> Filter {
        Filter::eq(fields::JOB_NAME, job_name).and(Filter::eq(fields::JOB_KEY, job_key))
    }
}

/// Parameters of a stored instance, `None` if the instance does not exist.
pub(crate) fn load_instance_parameters<S>(
    store: &S,
    id: JobInstanceId,
) -> RepositoryResult<Option<JobParameters>>
where
    S: DocumentStore + ?Sized,
{
    store
        .find_one(collections::JOB_INSTANCE, &INSTANCES.by_id(id.get()))?
        .map(|doc| parameters_of(&doc))
        .transpose()
}

impl<S: DocumentStore> JobInstanceRepository for DocumentJobInstanceRepository<S> {
    fn create_job_instance(&self, job_name: &str, parameters: &JobParameters) -> RepositoryResult<JobInstance> {
        if job_name.is_empty() {
            return Err(RepositoryError::validation("JobInstance job name cannot be null"));
        }

        let job_key = fingerprint(parameters);
        let duplicate = || {
            RepositoryError::UniquenessViolation(format!(
                "JobInstance already exists for job '{job_name}' with key {job_key}"
            ))
        };

        let filter = Self::by_name_and_key(job_name, &job_key);
        if self.store.count(collections::JOB_INSTANCE, &filter)? > 0 {
            return Err(duplicate());
        }

        let doc = to_document(job_name, &job_key, parameters)?;
        let (id, version) = match concurrency::create(&self.store, &INSTANCES, doc) {
            Ok(created) => created,
            Err(RepositoryError::Store(StoreError::DuplicateKey(index))) => {
                warn!(job_name, %index, "lost job instance creation race");
                return Err(duplicate());
            }
            Err(e) => return Err(e),
        };

        debug!(job_name, job_instance_id = id, job_key = %job_key, "job instance created");
        Ok(JobInstance {
            id: JobInstanceId::new(id),
            job_name: job_name.to_string(),
            parameters: parameters.clone(),
            job_key,
            version,
        })
    }

    fn get_job_instance(&self, job_name: &str, parameters: &JobParameters) -> RepositoryResult<Option<JobInstance>> {
        let filter = Self::by_name_and_key(job_name, &fingerprint(parameters));
        let doc = self.store.find_one(collections::JOB_INSTANCE, &filter)?;
        from_document(doc.as_ref())
    }

    fn get_job_instance_by_id(&self, id: JobInstanceId) -> RepositoryResult<Option<JobInstance>> {
        let doc = self
            .store
            .find_one(collections::JOB_INSTANCE, &INSTANCES.by_id(id.get()))?;
        from_document(doc.as_ref())
    }

    fn get_job_instance_for_execution(&self, execution_id: JobExecutionId) -> RepositoryResult<Option<JobInstance>> {
        let execution = self.store.find_one(
            collections::JOB_EXECUTION,
            &Filter::eq(fields::JOB_EXECUTION_ID, execution_id.get()),
        )?;
        let Some(instance_id) = execution
            .as_ref()
            .and_then(|doc| doc.get(fields::JOB_INSTANCE_ID))
            .and_then(Value::as_i64)
        else {
            return Ok(None);
        };
        self.get_job_instance_by_id(JobInstanceId::new(instance_id))
    }

    fn get_job_instances(&self, job_name: &str, start: usize, count: usize) -> RepositoryResult<Vec<JobInstance>> {
        let options = FindOptions::new()
            .sort_desc(fields::JOB_INSTANCE_ID)
            .skip(start)
            .limit(count);
        let docs = self.store.find(
            collections::JOB_INSTANCE,
            &Filter::eq(fields::JOB_NAME, job_name),
            &options,
        )?;

        let mut out = Vec::with_capacity(docs.len());
        for doc in &docs {
            out.extend(from_document(Some(doc))?);
        }
        Ok(out)
    }

    fn get_job_names(&self) -> RepositoryResult<Vec<String>> {
        let values = self
            .store
            .distinct(collections::JOB_INSTANCE, fields::JOB_NAME, &Filter::All)?;
        let mut names: Vec<String> = values
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }

    fn get_job_instance_count(&self, job_name: &str) -> RepositoryResult<u64> {
        match self.count_job_instances(job_name)? {
            0 => Err(RepositoryError::not_found(format!(
                "no job instances for job '{job_name}'"
            ))),
            n => Ok(n),
        }
    }

    fn count_job_instances(&self, job_name: &str) -> RepositoryResult<u64> {
        Ok(self
            .store
            .count(collections::JOB_INSTANCE, &Filter::eq(fields::JOB_NAME, job_name))?)
    }
}
