//! Job instance: identity of one logical job run-request.

use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::id::JobInstanceId;
use crate::parameters::JobParameters;

/// A job name + parameter set that has been registered with the repository.
///
/// Instances are immutable once created: they are only ever constructed by the
/// repository, always carry an id, and stay at their initial version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: JobInstanceId,
    pub job_name: String,
    pub parameters: JobParameters,
    /// Fingerprint of `parameters`, 32 lowercase hex characters.
    pub job_key: String,
    pub version: u32,
}

impl Entity for JobInstance {
    type Id = JobInstanceId;
    const KIND: &'static str = "JobInstance";

    fn id(&self) -> Option<JobInstanceId> {
        Some(self.id)
    }

    fn version(&self) -> Option<u32> {
        Some(self.version)
    }
}
