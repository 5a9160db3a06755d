use tracing::debug;

use batchstore_core::{ExecutionContext, JobExecution, JobExecutionId, StepExecution, StepExecutionId};

use super::ExecutionContextRepository;
use crate::codec::{decode_context, encode_context};
use crate::error::{RepositoryError, RepositoryResult};
use crate::schema::{collections, fields};
use crate::store::{DocumentStore, Filter, IndexSpec, Value};

/// The execution a context belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ContextOwner {
    JobExecution(JobExecutionId),
    StepExecution(StepExecutionId),
}

impl ContextOwner {
    pub fn of_job_execution(execution: &JobExecution) -> RepositoryResult<Self> {
        execution
            .id
            .map(ContextOwner::JobExecution)
            .ok_or_else(|| RepositoryError::validation("JobExecution has no id; save it first"))
    }

    pub fn of_step_execution(step: &StepExecution) -> RepositoryResult<Self> {
        step.id
            .map(ContextOwner::StepExecution)
            .ok_or_else(|| RepositoryError::validation("StepExecution has no id; save it first"))
    }

    /// Field that holds the owner id in the context document.
    pub fn field(self) -> &'static str {
        match self {
            ContextOwner::JobExecution(_) => fields::JOB_EXECUTION_ID,
            ContextOwner::StepExecution(_) => fields::STEP_EXECUTION_ID,
        }
    }

    pub fn id(self) -> i64 {
        match self {
            ContextOwner::JobExecution(id) => id.get(),
            ContextOwner::StepExecution(id) => id.get(),
        }
    }

    fn filter(self) -> Filter {
        Filter::eq(self.field(), self.id())
    }
}

impl core::fmt::Display for ContextOwner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ContextOwner::JobExecution(id) => write!(f, "JobExecution {id}"),
            ContextOwner::StepExecution(id) => write!(f, "StepExecution {id}"),
        }
    }
}

/// Document-backed [`ExecutionContextRepository`].
///
/// One document per owner. Every put replaces the whole document.
#[derive(Debug, Clone)]
pub struct DocumentExecutionContextRepository<S> {
    store: S,
}

impl<S: DocumentStore> DocumentExecutionContextRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn ensure_indexes(&self) -> RepositoryResult<()> {
        let index = IndexSpec::asc(fields::STEP_EXECUTION_ID).then_asc(fields::JOB_EXECUTION_ID);
        self.store.create_index(collections::EXECUTION_CONTEXT, &index)?;
        Ok(())
    }
}

impl<S: DocumentStore> ExecutionContextRepository for DocumentExecutionContextRepository<S> {
    fn get_execution_context(&self, owner: ContextOwner) -> RepositoryResult<ExecutionContext> {
        match self.store.find_one(collections::EXECUTION_CONTEXT, &owner.filter())? {
            Some(doc) => decode_context(&doc),
            None => Ok(ExecutionContext::new()),
        }
    }

    fn put_execution_context(&self, owner: ContextOwner, context: &ExecutionContext) -> RepositoryResult<()> {
        let mut doc = encode_context(context)?;
        doc.insert(owner.field().to_string(), Value::Int(owner.id()));

        let result = self
            .store
            .replace_one(collections::EXECUTION_CONTEXT, &owner.filter(), doc, true)?;
        debug!(
            owner = %owner,
            entries = context.len(),
            created = result.upserted,
            "execution context saved"
        );
        Ok(())
    }
}
