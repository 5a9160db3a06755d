//! Step execution: one step's run inside a job execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::ExecutionContext;
use crate::entity::Entity;
use crate::error::{DomainError, DomainResult};
use crate::id::{JobExecutionId, StepExecutionId};
use crate::status::{BatchStatus, ExitStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: Option<StepExecutionId>,
    pub job_execution_id: JobExecutionId,
    pub step_name: String,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub commit_count: u64,
    pub read_count: u64,
    pub filter_count: u64,
    pub write_count: u64,
    pub read_skip_count: u64,
    pub write_skip_count: u64,
    pub process_skip_count: u64,
    pub rollback_count: u64,
    pub version: Option<u32>,
    #[serde(default)]
    pub execution_context: ExecutionContext,
}

impl StepExecution {
    /// A new, not yet persisted step execution, started now.
    pub fn new(step_name: impl Into<String>, job_execution_id: JobExecutionId) -> Self {
        Self {
            id: None,
            job_execution_id,
            step_name: step_name.into(),
            status: BatchStatus::Starting,
            exit_status: ExitStatus::executing(),
            start_time: Some(Utc::now()),
            end_time: None,
            last_updated: None,
            commit_count: 0,
            read_count: 0,
            filter_count: 0,
            write_count: 0,
            read_skip_count: 0,
            write_skip_count: 0,
            process_skip_count: 0,
            rollback_count: 0,
            version: None,
            execution_context: ExecutionContext::new(),
        }
    }

    pub fn skip_count(&self) -> u64 {
        self.read_skip_count + self.write_skip_count + self.process_skip_count
    }

    /// Counters in a fixed order, paired with their names.
    pub fn counters(&self) -> [(&'static str, u64); 8] {
        [
            ("commit", self.commit_count),
            ("read", self.read_count),
            ("filter", self.filter_count),
            ("write", self.write_count),
            ("readSkip", self.read_skip_count),
            ("writeSkip", self.write_skip_count),
            ("processSkip", self.process_skip_count),
            ("rollback", self.rollback_count),
        ]
    }

    /// Counters never move backwards within one execution.
    pub fn check_progress_since(&self, previous: &StepExecution) -> DomainResult<()> {
        for ((name, now), (_, before)) in self.counters().into_iter().zip(previous.counters()) {
            if now < before {
                return Err(DomainError::validation(format!(
                    "StepExecution {name} count decreased from {before} to {now}"
                )));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.step_name.is_empty() {
            return Err(DomainError::validation("StepExecution step name cannot be null"));
        }
        if self.start_time.is_none() {
            return Err(DomainError::validation("StepExecution start time cannot be null"));
        }
        Ok(())
    }
}

impl Entity for StepExecution {
    type Id = StepExecutionId;
    const KIND: &'static str = "StepExecution";

    fn id(&self) -> Option<StepExecutionId> {
        self.id
    }

    fn version(&self) -> Option<u32> {
        self.version
    }
}
