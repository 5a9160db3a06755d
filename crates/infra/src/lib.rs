//! Infrastructure layer: document store, persistence helpers, repositories.
//!
//! The repositories in [`repository`] are the whole surface the orchestration
//! engine uses. They are built from a handful of free-standing helpers:
//!
//! - [`sequence`]: atomic per-kind id allocation
//! - [`job_key`]: deterministic parameter fingerprints
//! - [`codec`]: execution-context and job-parameter encoding
//! - [`concurrency`]: versioned create and compare-and-swap update
//! - [`mapping`]: entity ⇄ document field tables

pub mod codec;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod job_key;
pub mod mapping;
pub mod repository;
pub mod schema;
pub mod sequence;
pub mod store;

pub use config::{ConfigError, StoreBackend, StoreConfig};
pub use error::{RepositoryError, RepositoryResult};
pub use repository::{
    BatchRepositories, ContextOwner, DocumentExecutionContextRepository,
    DocumentJobExecutionRepository, DocumentJobInstanceRepository,
    DocumentStepExecutionRepository, ExecutionContextRepository, JobExecutionRepository,
    JobInstanceRepository, SharedStore, StepExecutionRepository,
};

#[cfg(test)]
mod integration_tests;
