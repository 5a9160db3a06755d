//! Execution-state domain model for batch job repositories.
//!
//! This crate contains the **pure domain** types of the batch execution
//! repository (no storage concerns): identities, lifecycle status, job
//! parameters, execution contexts and the versioned entities built from them.

pub mod context;
pub mod entity;
pub mod error;
pub mod execution;
pub mod id;
pub mod instance;
pub mod parameters;
pub mod status;
pub mod step;
pub mod version;

pub use context::{ContextValue, ExecutionContext};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use execution::JobExecution;
pub use id::{JobExecutionId, JobInstanceId, StepExecutionId};
pub use instance::JobInstance;
pub use parameters::{JobParameter, JobParameters};
pub use status::{BatchStatus, ExitStatus};
pub use step::StepExecution;
pub use version::{ExpectedVersion, INITIAL_VERSION};
