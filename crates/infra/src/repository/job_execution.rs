use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::{debug, info};

use batchstore_core::{Entity, ExpectedVersion, JobExecution, JobExecutionId, JobInstance, JobParameters};

use super::job_instance::load_instance_parameters;
use super::JobExecutionRepository;
use crate::concurrency::{self, version_of, VersionedCollection};
use crate::error::{RepositoryError, RepositoryResult};
use crate::mapping::job_execution::{from_document, to_document};
use crate::mapping::job_instance::parameters_of;
use crate::mapping::status;
use crate::schema::{collections, fields, sequences};
use crate::store::{Document, DocumentStore, Filter, FindOptions, IndexSpec, Value};

pub(crate) const EXECUTIONS: VersionedCollection = VersionedCollection {
    entity: JobExecution::KIND,
    collection: collections::JOB_EXECUTION,
    id_field: fields::JOB_EXECUTION_ID,
    sequence: sequences::JOB_EXECUTION,
};

/// Document-backed [`JobExecutionRepository`].
#[derive(Debug, Clone)]
pub struct DocumentJobExecutionRepository<S> {
    store: S,
}

impl<S: DocumentStore> DocumentJobExecutionRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn ensure_indexes(&self) -> RepositoryResult<()> {
        for index in [
            IndexSpec::asc(fields::JOB_INSTANCE_ID),
            IndexSpec::asc(fields::JOB_EXECUTION_ID),
            IndexSpec::desc(fields::CREATE_TIME),
            IndexSpec::asc(fields::JOB_EXECUTION_ID).then_asc(fields::JOB_INSTANCE_ID),
        ] {
            self.store.create_index(collections::JOB_EXECUTION, &index)?;
        }
        Ok(())
    }

    /// Map a stored execution, reading the instance's parameters only when the
    /// caller has not supplied them.
    fn map(&self, doc: &Document, parameters: Option<JobParameters>) -> RepositoryResult<JobExecution> {
        let mut execution = from_document(Some(doc), parameters)?
            .ok_or_else(|| RepositoryError::inconsistency("mapped execution vanished"))?;
        if execution.job_parameters.is_none() {
            if let Some(instance_id) = execution.job_instance_id {
                execution.job_parameters = load_instance_parameters(&self.store, instance_id)?;
            }
        }
        Ok(execution)
    }

    fn by_instance(instance: &JobInstance) -> Filter {
        Filter::eq(fields::JOB_INSTANCE_ID, instance.id.get())
    }
}

fn required_id(execution: &JobExecution) -> RepositoryResult<JobExecutionId> {
    execution
        .id
        .ok_or_else(|| RepositoryError::validation("JobExecution has no id; save it first"))
}

impl<S: DocumentStore> JobExecutionRepository for DocumentJobExecutionRepository<S> {
    fn save_job_execution(&self, execution: &mut JobExecution) -> RepositoryResult<()> {
        concurrency::check_unsaved(execution)?;
        execution.validate()?;

        let doc = to_document(execution)?;
        let (id, version) = concurrency::create(&self.store, &EXECUTIONS, doc)?;
        execution.id = Some(JobExecutionId::new(id));
        execution.version = Some(version);

        debug!(job_execution_id = id, status = %execution.status, "job execution saved");
        Ok(())
    }

    fn update_job_execution(&self, execution: &mut JobExecution) -> RepositoryResult<()> {
        let (id, expected) = concurrency::update_target(execution)?;
        execution.validate()?;

        if self.store.count(collections::JOB_EXECUTION, &EXECUTIONS.by_id(id.get()))? == 0 {
            return Err(RepositoryError::not_found(format!(
                "JobExecution {id} does not exist"
            )));
        }

        let doc = to_document(execution)?;
        let version = concurrency::compare_and_swap(&self.store, &EXECUTIONS, id.get(), expected, doc)?;
        execution.version = Some(version);

        debug!(job_execution_id = %id, version, status = %execution.status, "job execution updated");
        Ok(())
    }

    fn find_job_executions(&self, instance: &JobInstance) -> RepositoryResult<Vec<JobExecution>> {
        let docs = self.store.find(
            collections::JOB_EXECUTION,
            &Self::by_instance(instance),
            &FindOptions::new().sort_desc(fields::JOB_EXECUTION_ID),
        )?;
        docs.iter()
            .map(|doc| self.map(doc, Some(instance.parameters.clone())))
            .collect()
    }

    fn get_last_job_execution(&self, instance: &JobInstance) -> RepositoryResult<Option<JobExecution>> {
        // Two results are enough to tell a unique latest from a tie.
        let docs = self.store.find(
            collections::JOB_EXECUTION,
            &Self::by_instance(instance),
            &FindOptions::new().sort_desc(fields::CREATE_TIME).limit(2),
        )?;

        if let [first, second] = docs.as_slice() {
            let a = first.get(fields::CREATE_TIME).unwrap_or(&Value::Null);
            let b = second.get(fields::CREATE_TIME).unwrap_or(&Value::Null);
            if a.compare(b) == Ordering::Equal {
                return Err(RepositoryError::inconsistency(format!(
                    "more than one latest JobExecution for JobInstance {}",
                    instance.id
                )));
            }
        }

        docs.first()
            .map(|doc| self.map(doc, Some(instance.parameters.clone())))
            .transpose()
    }

    fn find_running_job_executions(&self, job_name: &str) -> RepositoryResult<Vec<JobExecution>> {
        let instances = self.store.find(
            collections::JOB_INSTANCE,
            &Filter::eq(fields::JOB_NAME, job_name),
            &FindOptions::new(),
        )?;

        let mut parameters: HashMap<i64, JobParameters> = HashMap::with_capacity(instances.len());
        for doc in &instances {
            let id = crate::mapping::required_i64(doc, fields::JOB_INSTANCE_ID)?;
            parameters.insert(id, parameters_of(doc)?);
        }
        if parameters.is_empty() {
            return Ok(Vec::new());
        }

        let filter = Filter::is_in(fields::JOB_INSTANCE_ID, parameters.keys().copied())
            .and(Filter::eq(fields::END_TIME, Value::Null));
        let docs = self.store.find(
            collections::JOB_EXECUTION,
            &filter,
            &FindOptions::new().sort_desc(fields::JOB_EXECUTION_ID),
        )?;

        docs.iter()
            .map(|doc| {
                let known = doc
                    .get(fields::JOB_INSTANCE_ID)
                    .and_then(Value::as_i64)
                    .and_then(|id| parameters.get(&id))
                    .cloned();
                self.map(doc, known)
            })
            .collect()
    }

    fn get_job_execution(&self, id: JobExecutionId) -> RepositoryResult<Option<JobExecution>> {
        self.store
            .find_one(collections::JOB_EXECUTION, &EXECUTIONS.by_id(id.get()))?
            .map(|doc| self.map(&doc, None))
            .transpose()
    }

    fn synchronize_status(&self, execution: &mut JobExecution) -> RepositoryResult<()> {
        let id = required_id(execution)?;
        let doc = self
            .store
            .find_one(collections::JOB_EXECUTION, &EXECUTIONS.by_id(id.get()))?
            .ok_or_else(|| RepositoryError::not_found(format!("JobExecution {id} does not exist")))?;

        let stored_version = version_of(&doc)?;
        if !ExpectedVersion::of(execution.version).matches(Some(stored_version)) {
            let stored_status = status(&doc)?;
            info!(
                job_execution_id = %id,
                local_version = ?execution.version,
                stored_version,
                stored_status = %stored_status,
                "synchronizing job execution status"
            );
            execution.upgrade_status(stored_status);
            execution.version = Some(stored_version);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{DocumentJobInstanceRepository, JobInstanceRepository};
    use crate::store::InMemoryDocumentStore;
    use batchstore_core::BatchStatus;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    struct Fixture {
        instances: DocumentJobInstanceRepository<Arc<InMemoryDocumentStore>>,
        executions: DocumentJobExecutionRepository<Arc<InMemoryDocumentStore>>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryDocumentStore::new());
        Fixture {
            instances: DocumentJobInstanceRepository::new(store.clone()),
            executions: DocumentJobExecutionRepository::new(store),
        }
    }

    fn instance(f: &Fixture, name: &str, run: i64) -> JobInstance {
        f.instances
            .create_job_instance(name, &JobParameters::new().with("run", run))
            .unwrap()
    }

    fn saved_execution(f: &Fixture, instance: &JobInstance) -> JobExecution {
        let mut execution = JobExecution::new(instance.id, instance.parameters.clone());
        f.executions.save_job_execution(&mut execution).unwrap();
        execution
    }

    #[test]
    fn save_assigns_id_and_first_version() {
        let f = fixture();
        let instance = instance(&f, "ImportJob", 1);
        let execution = saved_execution(&f, &instance);
        assert!(execution.id.is_some());
        assert_eq!(execution.version, Some(1));
    }

    #[test]
    fn saving_twice_is_rejected() {
        let f = fixture();
        let instance = instance(&f, "ImportJob", 1);
        let mut execution = saved_execution(&f, &instance);
        let err = f.executions.save_job_execution(&mut execution).unwrap_err();
        assert!(matches!(err, RepositoryError::Validation(_)));
    }

    #[test]
    fn update_advances_version_and_persists_fields() {
        let f = fixture();
        let instance = instance(&f, "ImportJob", 1);
        let mut execution = saved_execution(&f, &instance);

        execution.status = BatchStatus::Started;
        execution.start_time = Some(Utc::now());
        f.executions.update_job_execution(&mut execution).unwrap();
        assert_eq!(execution.version, Some(2));

        let stored = f
            .executions
            .get_job_execution(execution.id.unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, BatchStatus::Started);
        assert_eq!(stored.version, Some(2));
        assert_eq!(stored.job_parameters, Some(instance.parameters.clone()));
    }

    #[test]
    fn stale_update_conflicts_and_leaves_document_unchanged() {
        let f = fixture();
        let instance = instance(&f, "ImportJob", 1);
        let mut current = saved_execution(&f, &instance);
        let mut stale = current.clone();

        current.status = BatchStatus::Started;
        f.executions.update_job_execution(&mut current).unwrap();

        stale.status = BatchStatus::Failed;
        let err = f.executions.update_job_execution(&mut stale).unwrap_err();
        assert!(matches!(err, RepositoryError::ConcurrencyConflict { expected: 1, actual: Some(2), .. }));
        assert_eq!(stale.version, Some(1));

        let stored = f.executions.get_job_execution(current.id.unwrap()).unwrap().unwrap();
        assert_eq!(stored.status, BatchStatus::Started);
    }

    #[test]
    fn update_of_unknown_execution_is_not_found() {
        let f = fixture();
        let instance = instance(&f, "ImportJob", 1);
        let mut ghost = JobExecution::new(instance.id, JobParameters::new());
        ghost.id = Some(JobExecutionId::new(99));
        ghost.version = Some(1);
        let err = f.executions.update_job_execution(&mut ghost).unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }

    #[test]
    fn update_without_version_is_a_validation_error() {
        let f = fixture();
        let instance = instance(&f, "ImportJob", 1);
        let mut execution = saved_execution(&f, &instance);
        execution.version = None;
        let err = f.executions.update_job_execution(&mut execution).unwrap_err();
        assert!(matches!(err, RepositoryError::Validation(_)));
    }

    #[test]
    fn executions_of_an_instance_are_newest_first() {
        let f = fixture();
        let instance = instance(&f, "ImportJob", 1);
        let first = saved_execution(&f, &instance);
        let second = saved_execution(&f, &instance);

        let found = f.executions.find_job_executions(&instance).unwrap();
        let ids: Vec<_> = found.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[test]
    fn last_execution_is_the_latest_created() {
        let f = fixture();
        let instance = instance(&f, "ImportJob", 1);
        let base = Utc::now();
        let mut latest = None;
        for offset in [2, 5, 3] {
            let mut execution = JobExecution::new(instance.id, instance.parameters.clone());
            execution.create_time = Some(base + Duration::seconds(offset));
            f.executions.save_job_execution(&mut execution).unwrap();
            if offset == 5 {
                latest = execution.id;
            }
        }

        let last = f.executions.get_last_job_execution(&instance).unwrap().unwrap();
        assert_eq!(last.id, latest);
    }

    #[test]
    fn tied_latest_executions_are_an_inconsistency() {
        let f = fixture();
        let instance = instance(&f, "ImportJob", 1);
        let at = Utc::now();
        for _ in 0..2 {
            let mut execution = JobExecution::new(instance.id, instance.parameters.clone());
            execution.create_time = Some(at);
            f.executions.save_job_execution(&mut execution).unwrap();
        }

        let err = f.executions.get_last_job_execution(&instance).unwrap_err();
        assert!(matches!(err, RepositoryError::Inconsistency(_)));
    }

    #[test]
    fn last_execution_of_fresh_instance_is_none() {
        let f = fixture();
        let instance = instance(&f, "ImportJob", 1);
        assert!(f.executions.get_last_job_execution(&instance).unwrap().is_none());
    }

    #[test]
    fn running_executions_span_instances_and_ignore_status() {
        let f = fixture();
        let a = instance(&f, "ImportJob", 1);
        let b = instance(&f, "ImportJob", 2);
        let other = instance(&f, "ExportJob", 1);

        let running_a = saved_execution(&f, &a);
        let mut finished_a = saved_execution(&f, &a);
        finished_a.end_time = Some(Utc::now());
        finished_a.status = BatchStatus::Completed;
        f.executions.update_job_execution(&mut finished_a).unwrap();

        let mut running_b = saved_execution(&f, &b);
        running_b.status = BatchStatus::Completed;
        f.executions.update_job_execution(&mut running_b).unwrap();

        saved_execution(&f, &other);

        let running = f.executions.find_running_job_executions("ImportJob").unwrap();
        let mut ids: Vec<_> = running.iter().map(|e| e.id).collect();
        ids.sort();
        assert_eq!(ids, vec![running_a.id, running_b.id]);
        assert!(running.iter().all(|e| e.job_parameters.is_some()));
        assert!(f.executions.find_running_job_executions("NoSuchJob").unwrap().is_empty());
    }

    #[test]
    fn synchronize_adopts_newer_stored_status() {
        let f = fixture();
        let instance = instance(&f, "ImportJob", 1);
        let mut local = saved_execution(&f, &instance);

        let mut remote = local.clone();
        remote.status = BatchStatus::Stopping;
        f.executions.update_job_execution(&mut remote).unwrap();

        local.status = BatchStatus::Started;
        f.executions.synchronize_status(&mut local).unwrap();
        assert_eq!(local.status, BatchStatus::Stopping);
        assert_eq!(local.version, Some(2));

        // Already in sync: nothing changes.
        f.executions.synchronize_status(&mut local).unwrap();
        assert_eq!(local.version, Some(2));
    }
}
