//! Repositories for job instances, executions, step executions and contexts.
//!
//! One trait per entity kind, each with a document-store implementation.
//! The implementations hold nothing but a store handle: every read is a fresh
//! query, and concurrent writers are kept apart by the version check in
//! [`crate::concurrency`], not by any in-process lock.
//!
//! ## Lifecycle
//!
//! ```text
//! create_job_instance ──► save_job_execution ──► save_step_execution
//!                              │                        │
//!                     update_job_execution      update_step_execution
//!                              │                        │
//!                     save_job_execution_context  save_step_execution_context
//! ```
//!
//! Save assigns the id and version 1; every update must present the version
//! last observed and advances it by one.

mod execution_context;
mod job_execution;
mod job_instance;
mod step_execution;

use std::sync::Arc;

use tracing::info;

use batchstore_core::{
    ExecutionContext, JobExecution, JobExecutionId, JobInstance, JobInstanceId, JobParameters,
    StepExecution, StepExecutionId,
};

use crate::error::{RepositoryError, RepositoryResult};
use crate::store::DocumentStore;

pub use execution_context::{ContextOwner, DocumentExecutionContextRepository};
pub use job_execution::DocumentJobExecutionRepository;
pub use job_instance::DocumentJobInstanceRepository;
pub use step_execution::DocumentStepExecutionRepository;

/// Store handle shared by all repositories of one process.
pub type SharedStore = Arc<dyn DocumentStore>;

/// Job instances: name + parameter identity.
pub trait JobInstanceRepository: Send + Sync {
    /// Register a new instance.
    ///
    /// Fails with `UniquenessViolation` if an instance with the same name and
    /// job key already exists.
    fn create_job_instance(&self, job_name: &str, parameters: &JobParameters) -> RepositoryResult<JobInstance>;

    fn get_job_instance(&self, job_name: &str, parameters: &JobParameters) -> RepositoryResult<Option<JobInstance>>;

    fn get_job_instance_by_id(&self, id: JobInstanceId) -> RepositoryResult<Option<JobInstance>>;

    /// Instance that owns the given execution.
    fn get_job_instance_for_execution(&self, execution_id: JobExecutionId) -> RepositoryResult<Option<JobInstance>>;

    /// Instances of a job, newest id first, paged.
    fn get_job_instances(&self, job_name: &str, start: usize, count: usize) -> RepositoryResult<Vec<JobInstance>>;

    /// Distinct job names, sorted ascending.
    fn get_job_names(&self) -> RepositoryResult<Vec<String>>;

    /// Number of instances of a job; `NotFound` if there are none.
    fn get_job_instance_count(&self, job_name: &str) -> RepositoryResult<u64>;

    fn count_job_instances(&self, job_name: &str) -> RepositoryResult<u64>;
}

/// Job executions: one run attempt of an instance.
pub trait JobExecutionRepository: Send + Sync {
    /// Persist a new execution, assigning its id and version.
    fn save_job_execution(&self, execution: &mut JobExecution) -> RepositoryResult<()>;

    /// Write the execution if its version is still current, then advance it.
    fn update_job_execution(&self, execution: &mut JobExecution) -> RepositoryResult<()>;

    /// Executions of an instance, newest id first.
    fn find_job_executions(&self, instance: &JobInstance) -> RepositoryResult<Vec<JobExecution>>;

    /// Execution with the latest create time.
    ///
    /// Two executions with exactly the same create time are reported as
    /// `Inconsistency`.
    fn get_last_job_execution(&self, instance: &JobInstance) -> RepositoryResult<Option<JobExecution>>;

    /// Executions without an end time across all instances of `job_name`.
    fn find_running_job_executions(&self, job_name: &str) -> RepositoryResult<Vec<JobExecution>>;

    fn get_job_execution(&self, id: JobExecutionId) -> RepositoryResult<Option<JobExecution>>;

    /// Adopt the stored status and version if another writer moved ahead.
    fn synchronize_status(&self, execution: &mut JobExecution) -> RepositoryResult<()>;
}

/// Step executions of a job execution.
pub trait StepExecutionRepository: Send + Sync {
    fn save_step_execution(&self, step: &mut StepExecution) -> RepositoryResult<()>;

    /// Save several steps; all are validated before the first is written.
    fn save_step_executions(&self, steps: &mut [StepExecution]) -> RepositoryResult<()>;

    fn update_step_execution(&self, step: &mut StepExecution) -> RepositoryResult<()>;

    fn get_step_execution(
        &self,
        execution: &JobExecution,
        id: StepExecutionId,
    ) -> RepositoryResult<Option<StepExecution>>;

    /// Load all steps of `execution` (ascending id) into `execution.step_executions`.
    fn add_step_executions(&self, execution: &mut JobExecution) -> RepositoryResult<()>;

    /// Most recently started step named `step_name` across all executions of
    /// the instance.
    fn get_last_step_execution(
        &self,
        instance: &JobInstance,
        step_name: &str,
    ) -> RepositoryResult<Option<StepExecution>>;

    fn count_step_executions(&self, instance: &JobInstance, step_name: &str) -> RepositoryResult<u64>;
}

/// Execution contexts, one per job or step execution.
pub trait ExecutionContextRepository: Send + Sync {
    /// Stored context of `owner`; empty if none was ever saved.
    fn get_execution_context(&self, owner: ContextOwner) -> RepositoryResult<ExecutionContext>;

    /// Replace the stored context of `owner` with `context`.
    fn put_execution_context(&self, owner: ContextOwner, context: &ExecutionContext) -> RepositoryResult<()>;

    fn get_job_execution_context(&self, execution: &JobExecution) -> RepositoryResult<ExecutionContext> {
        self.get_execution_context(ContextOwner::of_job_execution(execution)?)
    }

    fn get_step_execution_context(&self, step: &StepExecution) -> RepositoryResult<ExecutionContext> {
        self.get_execution_context(ContextOwner::of_step_execution(step)?)
    }

    fn save_job_execution_context(&self, execution: &JobExecution) -> RepositoryResult<()> {
        self.put_execution_context(
            ContextOwner::of_job_execution(execution)?,
            &execution.execution_context,
        )
    }

    fn save_step_execution_context(&self, step: &StepExecution) -> RepositoryResult<()> {
        self.put_execution_context(ContextOwner::of_step_execution(step)?, &step.execution_context)
    }

    /// Save the context of every step attached to `execution`, then the
    /// execution's own context.
    fn save_execution_contexts(&self, execution: &JobExecution) -> RepositoryResult<()> {
        let owner = ContextOwner::of_job_execution(execution)?;
        if let Some(step) = execution
            .step_executions
            .iter()
            .find(|step| Some(step.job_execution_id) != execution.id)
        {
            return Err(RepositoryError::validation(format!(
                "StepExecution {} belongs to JobExecution {}, not {owner}",
                step.step_name, step.job_execution_id
            )));
        }
        for step in &execution.step_executions {
            self.save_step_execution_context(step)?;
        }
        self.put_execution_context(owner, &execution.execution_context)
    }
}

/// All repositories over one shared store handle.
pub struct BatchRepositories {
    pub job_instances: DocumentJobInstanceRepository<SharedStore>,
    pub job_executions: DocumentJobExecutionRepository<SharedStore>,
    pub step_executions: DocumentStepExecutionRepository<SharedStore>,
    pub execution_contexts: DocumentExecutionContextRepository<SharedStore>,
}

impl BatchRepositories {
    pub fn new(store: SharedStore) -> Self {
        Self {
            job_instances: DocumentJobInstanceRepository::new(store.clone()),
            job_executions: DocumentJobExecutionRepository::new(store.clone()),
            step_executions: DocumentStepExecutionRepository::new(store.clone()),
            execution_contexts: DocumentExecutionContextRepository::new(store),
        }
    }

    /// Create the lookup indexes of every collection. Idempotent.
    pub fn ensure_indexes(&self) -> RepositoryResult<()> {
        self.job_instances.ensure_indexes()?;
        self.job_executions.ensure_indexes()?;
        self.step_executions.ensure_indexes()?;
        self.execution_contexts.ensure_indexes()?;
        info!("batch repository indexes ensured");
        Ok(())
    }
}
