#![forbid(unsafe_code)]

use jobtrack_core::{BackendError, JobId, JobStatus, RecordError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job {0} is not known to this session")]
    NotFound(JobId),
    #[error("job {0} is already registered with different state")]
    DuplicateJob(JobId),
    #[error("job {job_id} is not terminal (status={status})")]
    NotTerminal { job_id: JobId, status: JobStatus },
    #[error("job {0} is completed and can no longer change")]
    AlreadyCompleted(JobId),
    #[error("invalid job record: {0}")]
    InvalidRecord(#[source] RecordError),
    #[error("job record invariant violated: {0}")]
    InvariantViolation(#[source] RecordError),
    #[error("bulk job lookup failed: {0}")]
    LookupFailed(#[source] BackendError),
}

impl From<RecordError> for StoreError {
    fn from(value: RecordError) -> Self {
        match value {
            RecordError::ChildMismatch { .. } => Self::InvariantViolation(value),
            other => Self::InvalidRecord(other),
        }
    }
}
