//! Job execution: one attempt to run a job instance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::ExecutionContext;
use crate::entity::Entity;
use crate::error::{DomainError, DomainResult};
use crate::id::{JobExecutionId, JobInstanceId};
use crate::parameters::JobParameters;
use crate::status::{BatchStatus, ExitStatus};
use crate::step::StepExecution;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: Option<JobExecutionId>,
    pub job_instance_id: Option<JobInstanceId>,
    /// Parameters of the owning instance, when resolved.
    pub job_parameters: Option<JobParameters>,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub create_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    /// `None` while the execution is still running.
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub version: Option<u32>,
    #[serde(default)]
    pub execution_context: ExecutionContext,
    #[serde(default)]
    pub step_executions: Vec<StepExecution>,
}

impl JobExecution {
    /// A new, not yet persisted execution of the given instance.
    pub fn new(job_instance_id: JobInstanceId, job_parameters: JobParameters) -> Self {
        Self {
            id: None,
            job_instance_id: Some(job_instance_id),
            job_parameters: Some(job_parameters),
            status: BatchStatus::Starting,
            exit_status: ExitStatus::unknown(),
            create_time: Some(Utc::now()),
            start_time: None,
            end_time: None,
            last_updated: None,
            version: None,
            execution_context: ExecutionContext::new(),
            step_executions: Vec::new(),
        }
    }

    /// An execution shell carrying only its id, filled in by a mapper.
    pub fn with_id(id: JobExecutionId) -> Self {
        Self {
            id: Some(id),
            job_instance_id: None,
            job_parameters: None,
            status: BatchStatus::Unknown,
            exit_status: ExitStatus::unknown(),
            create_time: None,
            start_time: None,
            end_time: None,
            last_updated: None,
            version: None,
            execution_context: ExecutionContext::new(),
            step_executions: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn upgrade_status(&mut self, status: BatchStatus) {
        self.status = self.status.upgrade_to(status);
    }

    /// Required fields for both create and update.
    pub fn validate(&self) -> DomainResult<()> {
        if self.job_instance_id.is_none() {
            return Err(DomainError::validation(
                "JobExecution job instance id cannot be null",
            ));
        }
        if self.create_time.is_none() {
            return Err(DomainError::validation(
                "JobExecution create time cannot be null",
            ));
        }
        Ok(())
    }
}

impl Entity for JobExecution {
    type Id = JobExecutionId;
    const KIND: &'static str = "JobExecution";

    fn id(&self) -> Option<JobExecutionId> {
        self.id
    }

    fn version(&self) -> Option<u32> {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_execution_is_unsaved_and_valid() {
        let execution = JobExecution::new(JobInstanceId::new(1), JobParameters::new());
        assert!(execution.id.is_none());
        assert!(execution.version.is_none());
        assert!(execution.is_running());
        assert!(execution.validate().is_ok());
    }

    #[test]
    fn missing_create_time_fails_validation() {
        let mut execution = JobExecution::new(JobInstanceId::new(1), JobParameters::new());
        execution.create_time = None;
        assert!(matches!(execution.validate(), Err(DomainError::Validation(_))));
    }
}
