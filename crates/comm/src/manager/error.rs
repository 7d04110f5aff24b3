#![forbid(unsafe_code)]

use super::RetryPair;
use crate::protocol::ErrorKind;
use jobtrack_core::{BackendError, JobId};
use jobtrack_storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("No valid job ids")]
    NoValidJobIds,
    #[error("No job present with id {0}")]
    JobNotFound(JobId),
    #[error("No jobs present with ids: {}", join_ids(.job_ids))]
    JobsNotFound {
        job_ids: Vec<JobId>,
        /// Retries the backend accepted in the same request.
        retried: Vec<RetryPair>,
    },
    #[error("Can't cancel job(s) {}: {source}", join_ids(.job_ids))]
    CancelFailed {
        job_ids: Vec<JobId>,
        #[source]
        source: BackendError,
    },
    #[error("Jobs retry failed for {}: {source}", join_ids(.job_ids))]
    RetryFailed {
        job_ids: Vec<JobId>,
        #[source]
        source: BackendError,
    },
    #[error("Can't get job logs for {job_id}: {source}")]
    LogsFailed {
        job_id: JobId,
        #[source]
        source: BackendError,
    },
    #[error("Unable to submit job: {0}")]
    SubmitFailed(#[source] BackendError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ManagerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoValidJobIds => ErrorKind::Validation,
            Self::JobNotFound(_) => ErrorKind::NotFound,
            Self::JobsNotFound { retried, .. } if !retried.is_empty() => ErrorKind::PartialFailure,
            Self::JobsNotFound { .. } => ErrorKind::NotFound,
            Self::CancelFailed { .. }
            | Self::RetryFailed { .. }
            | Self::LogsFailed { .. }
            | Self::SubmitFailed(_) => ErrorKind::Remote,
            Self::Store(err) => match err {
                StoreError::NotFound(_) => ErrorKind::NotFound,
                StoreError::LookupFailed(_) => ErrorKind::Remote,
                StoreError::InvariantViolation(_) => ErrorKind::InvariantViolation,
                StoreError::DuplicateJob(_)
                | StoreError::NotTerminal { .. }
                | StoreError::AlreadyCompleted(_)
                | StoreError::InvalidRecord(_) => ErrorKind::Validation,
            },
        }
    }

    /// The backend's own explanation, when the failure came from the backend.
    pub fn backend_detail(&self) -> Option<String> {
        match self {
            Self::CancelFailed { source, .. }
            | Self::RetryFailed { source, .. }
            | Self::LogsFailed { source, .. }
            | Self::SubmitFailed(source) => Some(source.detail()),
            Self::Store(StoreError::LookupFailed(source)) => Some(source.detail()),
            _ => None,
        }
    }
}

fn join_ids(ids: &[JobId]) -> String {
    let ids = ids.iter().map(JobId::as_str).collect::<Vec<_>>();
    format!("[{}]", ids.join(", "))
}
