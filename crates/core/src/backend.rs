#![forbid(unsafe_code)]

use crate::ids::JobId;
use crate::model::{JobState, LogLine, flag};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum BackendError {
    /// The execution service answered with an error object.
    #[error("{name} ({code}): {message}")]
    Server {
        code: i64,
        name: String,
        message: String,
    },
    #[error("backend transport failure: {0}")]
    Transport(String),
    #[error("malformed backend response: {0}")]
    Malformed(String),
}

impl BackendError {
    pub fn server(code: i64, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Server {
            code,
            name: name.into(),
            message: message.into(),
        }
    }

    /// Human-readable text for `job_comm_error.message`.
    pub fn detail(&self) -> String {
        match self {
            Self::Server { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Server { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Server { name, .. } => name,
            Self::Transport(_) => "TransportError",
            Self::Malformed(_) => "MalformedResponse",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelCheck {
    #[serde(default, deserialize_with = "flag")]
    pub finished: bool,
    #[serde(default, deserialize_with = "flag")]
    pub canceled: bool,
}

/// Per-job result of a bulk retry request.
#[derive(Clone, Debug, PartialEq)]
pub enum RetryOutcome {
    Retried { job_id: JobId, retry_id: JobId },
    Rejected { job_id: JobId, reason: String },
}

impl RetryOutcome {
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Retried { job_id, .. } | Self::Rejected { job_id, .. } => job_id,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LogChunk {
    #[serde(default)]
    pub lines: Vec<LogLine>,
    /// Total number of lines the backend holds for the job.
    #[serde(alias = "count", alias = "last_line_number")]
    pub total: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchSubmission {
    pub batch_id: JobId,
    #[serde(default)]
    pub child_job_ids: Vec<JobId>,
}

/// The remote execution service.
///
/// Every method is a single blocking request; implementations carry their own connection.
pub trait Backend {
    fn check_job(
        &mut self,
        job_id: &JobId,
        exclude_fields: &[&str],
    ) -> Result<JobState, BackendError>;

    /// Bulk state lookup. Ids the backend cannot resolve are simply absent from the map.
    fn check_jobs(
        &mut self,
        job_ids: &[JobId],
        exclude_fields: &[&str],
    ) -> Result<BTreeMap<JobId, JobState>, BackendError>;

    fn check_job_canceled(&mut self, job_id: &JobId) -> Result<CancelCheck, BackendError>;

    fn cancel_job(&mut self, job_id: &JobId) -> Result<(), BackendError>;

    fn cancel_jobs(&mut self, job_ids: &[JobId]) -> Result<(), BackendError> {
        for job_id in job_ids {
            self.cancel_job(job_id)?;
        }
        Ok(())
    }

    fn retry_jobs(&mut self, job_ids: &[JobId]) -> Result<Vec<RetryOutcome>, BackendError>;

    fn retry_job(&mut self, job_id: &JobId) -> Result<RetryOutcome, BackendError> {
        self.retry_jobs(std::slice::from_ref(job_id))?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Malformed(format!("empty retry result for {job_id}")))
    }

    fn get_job_logs(&mut self, job_id: &JobId, skip_lines: u64) -> Result<LogChunk, BackendError>;

    fn run_job(&mut self, params: &Value) -> Result<JobId, BackendError>;

    fn run_job_batch(
        &mut self,
        jobs: &[Value],
        batch_params: &Value,
    ) -> Result<BatchSubmission, BackendError>;
}
