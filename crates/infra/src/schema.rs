//! Collection and field names of the stored documents.
//!
//! These names are the on-disk contract; changing any of them orphans data
//! that is already stored.

/// Collection names.
pub mod collections {
    pub const SEQUENCES: &str = "Sequences";
    pub const JOB_INSTANCE: &str = "JobInstance";
    pub const JOB_EXECUTION: &str = "JobExecution";
    pub const STEP_EXECUTION: &str = "StepExecution";
    pub const EXECUTION_CONTEXT: &str = "ExecutionContext";
}

/// Field names.
pub mod fields {
    // Sequences
    pub const SEQUENCE_NAME: &str = "name";
    pub const SEQUENCE_VALUE: &str = "value";

    // Shared
    pub const VERSION: &str = "version";
    pub const STATUS: &str = "status";
    pub const EXIT_CODE: &str = "exitCode";
    pub const EXIT_MESSAGE: &str = "exitMessage";
    pub const START_TIME: &str = "startTime";
    pub const END_TIME: &str = "endTime";
    pub const LAST_UPDATED: &str = "lastUpdated";

    // JobInstance
    pub const JOB_INSTANCE_ID: &str = "jobInstanceId";
    pub const JOB_NAME: &str = "jobName";
    pub const JOB_KEY: &str = "jobKey";
    pub const JOB_PARAMETERS: &str = "jobParameters";

    // JobExecution
    pub const JOB_EXECUTION_ID: &str = "jobExecutionId";
    pub const CREATE_TIME: &str = "createTime";

    // StepExecution
    pub const STEP_EXECUTION_ID: &str = "stepExecutionId";
    pub const STEP_NAME: &str = "stepName";
    pub const COMMIT_COUNT: &str = "commitCount";
    pub const READ_COUNT: &str = "readCount";
    // Misspelling is part of the stored layout.
    pub const FILTER_COUNT: &str = "filterCout";
    pub const WRITE_COUNT: &str = "writeCount";
    pub const READ_SKIP_COUNT: &str = "readSkipCount";
    pub const WRITE_SKIP_COUNT: &str = "writeSkipCount";
    // Misspelling is part of the stored layout.
    pub const PROCESS_SKIP_COUNT: &str = "processSkipCout";
    pub const ROLLBACK_COUNT: &str = "rollbackCount";
}

/// Sequence kinds handed to the allocator, one counter per entity kind.
pub mod sequences {
    pub const JOB_INSTANCE: &str = "JobInstance";
    pub const JOB_EXECUTION: &str = "JobExecution";
    pub const STEP_EXECUTION: &str = "StepExecution";
}
