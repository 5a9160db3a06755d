use tracing::debug;

use batchstore_core::{Entity, ExpectedVersion, JobExecution, JobExecutionId, JobInstance, StepExecution, StepExecutionId};

use super::StepExecutionRepository;
use crate::concurrency::{self, version_of, VersionedCollection};
use crate::error::{RepositoryError, RepositoryResult};
use crate::mapping::step_execution::{from_document, to_document};
use crate::schema::{collections, fields, sequences};
use crate::store::{Document, DocumentStore, Filter, FindOptions, IndexSpec, Value};

pub(crate) const STEPS: VersionedCollection = VersionedCollection {
    entity: StepExecution::KIND,
    collection: collections::STEP_EXECUTION,
    id_field: fields::STEP_EXECUTION_ID,
    sequence: sequences::STEP_EXECUTION,
};

/// Document-backed [`StepExecutionRepository`].
#[derive(Debug, Clone)]
pub struct DocumentStepExecutionRepository<S> {
    store: S,
}

impl<S: DocumentStore> DocumentStepExecutionRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn ensure_indexes(&self) -> RepositoryResult<()> {
        for index in [
            IndexSpec::asc(fields::JOB_EXECUTION_ID),
            IndexSpec::asc(fields::STEP_EXECUTION_ID).then_asc(fields::JOB_EXECUTION_ID),
        ] {
            self.store.create_index(collections::STEP_EXECUTION, &index)?;
        }
        Ok(())
    }

    /// Ids of every execution of `instance`.
    fn execution_ids(&self, instance: &JobInstance) -> RepositoryResult<Vec<Value>> {
        Ok(self.store.distinct(
            collections::JOB_EXECUTION,
            fields::JOB_EXECUTION_ID,
            &Filter::eq(fields::JOB_INSTANCE_ID, instance.id.get()),
        )?)
    }

    fn named_steps_of(&self, instance: &JobInstance, step_name: &str) -> RepositoryResult<Option<Filter>> {
        let ids = self.execution_ids(instance)?;
        if ids.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            Filter::is_in(fields::JOB_EXECUTION_ID, ids).and(Filter::eq(fields::STEP_NAME, step_name)),
        ))
    }

    fn map_all(docs: &[Document]) -> RepositoryResult<Vec<StepExecution>> {
        let mut out = Vec::with_capacity(docs.len());
        for doc in docs {
            out.extend(from_document(Some(doc))?);
        }
        Ok(out)
    }

    fn check_unsaved(step: &StepExecution) -> RepositoryResult<()> {
        concurrency::check_unsaved(step)?;
        step.validate()?;
        Ok(())
    }

    fn insert(&self, step: &mut StepExecution) -> RepositoryResult<()> {
        let doc = to_document(step)?;
        let (id, version) = concurrency::create(&self.store, &STEPS, doc)?;
        step.id = Some(StepExecutionId::new(id));
        step.version = Some(version);
        debug!(
            step_execution_id = id,
            job_execution_id = %step.job_execution_id,
            step_name = %step.step_name,
            "step execution saved"
        );
        Ok(())
    }
}

fn owning_execution_id(execution: &JobExecution) -> RepositoryResult<JobExecutionId> {
    execution
        .id
        .ok_or_else(|| RepositoryError::validation("JobExecution has no id; save it first"))
}

impl<S: DocumentStore> StepExecutionRepository for DocumentStepExecutionRepository<S> {
    fn save_step_execution(&self, step: &mut StepExecution) -> RepositoryResult<()> {
        Self::check_unsaved(step)?;
        self.insert(step)
    }

    fn save_step_executions(&self, steps: &mut [StepExecution]) -> RepositoryResult<()> {
        for step in steps.iter() {
            Self::check_unsaved(step)?;
        }
        for step in steps.iter_mut() {
            self.insert(step)?;
        }
        Ok(())
    }

    fn update_step_execution(&self, step: &mut StepExecution) -> RepositoryResult<()> {
        let (id, expected) = concurrency::update_target(step)?;
        step.validate()?;

        let stored = self
            .store
            .find_one(collections::STEP_EXECUTION, &STEPS.by_id(id.get()))?
            .ok_or_else(|| RepositoryError::not_found(format!("StepExecution {id} does not exist")))?;

        // Only compare progress against the state this update replaces; a
        // stale caller gets the version conflict instead.
        if ExpectedVersion::Exact(expected).matches(Some(version_of(&stored)?)) {
            if let Some(previous) = from_document(Some(&stored))? {
                step.check_progress_since(&previous)?;
            }
        }

        let doc = to_document(step)?;
        let version = concurrency::compare_and_swap(&self.store, &STEPS, id.get(), expected, doc)?;
        step.version = Some(version);

        debug!(
            step_execution_id = %id,
            version,
            status = %step.status,
            read_count = step.read_count,
            write_count = step.write_count,
            "step execution updated"
        );
        Ok(())
    }

    fn get_step_execution(
        &self,
        execution: &JobExecution,
        id: StepExecutionId,
    ) -> RepositoryResult<Option<StepExecution>> {
        let execution_id = owning_execution_id(execution)?;
        let filter = STEPS
            .by_id(id.get())
            .and(Filter::eq(fields::JOB_EXECUTION_ID, execution_id.get()));
        let doc = self.store.find_one(collections::STEP_EXECUTION, &filter)?;
        from_document(doc.as_ref())
    }

    fn add_step_executions(&self, execution: &mut JobExecution) -> RepositoryResult<()> {
        let execution_id = owning_execution_id(execution)?;
        let docs = self.store.find(
            collections::STEP_EXECUTION,
            &Filter::eq(fields::JOB_EXECUTION_ID, execution_id.get()),
            &FindOptions::new().sort_asc(fields::STEP_EXECUTION_ID),
        )?;
        execution.step_executions = Self::map_all(&docs)?;
        Ok(())
    }

    fn get_last_step_execution(
        &self,
        instance: &JobInstance,
        step_name: &str,
    ) -> RepositoryResult<Option<StepExecution>> {
        let Some(filter) = self.named_steps_of(instance, step_name)? else {
            return Ok(None);
        };
        let options = FindOptions::new()
            .sort_desc(fields::START_TIME)
            .sort_desc(fields::STEP_EXECUTION_ID)
            .limit(1);
        let docs = self.store.find(collections::STEP_EXECUTION, &filter, &options)?;
        from_document(docs.first())
    }

    fn count_step_executions(&self, instance: &JobInstance, step_name: &str) -> RepositoryResult<u64> {
        match self.named_steps_of(instance, step_name)? {
            Some(filter) => Ok(self.store.count(collections::STEP_EXECUTION, &filter)?),
            None => Ok(0),
        }
    }
}
