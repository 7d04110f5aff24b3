#![forbid(unsafe_code)]

use crate::ids::JobId;
use crate::model::{AppTag, JobState, JobStatus, LogLine};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("cannot create a job without a job id")]
    MissingJobId,
    #[error("job id mismatch in state update (job={expected}, state={actual})")]
    JobIdMismatch { expected: JobId, actual: JobId },
    #[error("job {0} is not a batch parent")]
    NotBatchParent(JobId),
    #[error(
        "batch parent {job_id}: child id mismatch (expected={expected:?}, supplied={supplied:?})"
    )]
    ChildMismatch {
        job_id: JobId,
        expected: Vec<JobId>,
        supplied: Vec<JobId>,
    },
    #[error("job {0} does not exist")]
    DoesNotExist(JobId),
}

/// One tracked job: the last known backend state plus local bookkeeping.
///
/// Batch children are referenced by id; the child records live in the store next to the parent.
#[derive(Clone, Debug, PartialEq)]
pub struct JobRecord {
    job_id: JobId,
    state: JobState,
    children: Vec<JobId>,
    refresh_count: u32,
    canceling: bool,
    logs: Vec<LogLine>,
    last_refresh_ms: Option<i64>,
}

impl JobRecord {
    /// Builds a record from a backend state.
    ///
    /// Batch parents must be given their children, and the supplied ids must equal the
    /// `child_jobs` list the backend reported (order-insensitive). Non-batch jobs must not be
    /// given children.
    pub fn new(state: JobState, children: Option<Vec<JobId>>) -> Result<Self, RecordError> {
        let Some(job_id) = state.job_id.clone() else {
            return Err(RecordError::MissingJobId);
        };
        if state.status == Some(JobStatus::DoesNotExist) {
            return Err(RecordError::DoesNotExist(job_id));
        }

        let children = match (state.is_batch_job(), children) {
            (true, Some(children)) => {
                verify_children(&job_id, &state, &children)?;
                children
            }
            (true, None) => {
                return Err(RecordError::ChildMismatch {
                    expected: state.child_jobs.clone().unwrap_or_default(),
                    supplied: Vec::new(),
                    job_id,
                });
            }
            (false, Some(_)) => return Err(RecordError::NotBatchParent(job_id)),
            (false, None) => Vec::new(),
        };

        Ok(Self {
            job_id,
            state,
            children,
            refresh_count: 0,
            canceling: false,
            logs: Vec::new(),
            last_refresh_ms: None,
        })
    }

    pub fn with_refresh_count(mut self, refresh_count: u32) -> Self {
        self.refresh_count = refresh_count;
        self
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn status(&self) -> JobStatus {
        self.state.status.unwrap_or(JobStatus::Created)
    }

    pub fn is_batch_parent(&self) -> bool {
        self.state.is_batch_job()
    }

    /// A batch parent's batch id is its own id.
    pub fn batch_id(&self) -> Option<&JobId> {
        if self.is_batch_parent() {
            Some(&self.job_id)
        } else {
            self.state.batch_id.as_ref()
        }
    }

    pub fn children(&self) -> &[JobId] {
        &self.children
    }

    pub fn retry_ids(&self) -> &[JobId] {
        self.state.retry_ids.as_deref().unwrap_or_default()
    }

    pub fn retry_parent(&self) -> Option<&JobId> {
        self.state.retry_parent.as_ref()
    }

    pub fn app_id(&self) -> Option<&str> {
        self.state.job_input.as_ref()?.app_id.as_deref()
    }

    pub fn app_version(&self) -> Option<&str> {
        self.state.job_input.as_ref()?.app_version.as_deref()
    }

    pub fn params(&self) -> Option<&Value> {
        self.state.job_input.as_ref()?.params.as_ref()
    }

    pub fn tag(&self) -> AppTag {
        self.state
            .cell_info()
            .and_then(|info| info.tag)
            .unwrap_or_default()
    }

    pub fn cell_id(&self) -> Option<&str> {
        self.state.cell_info()?.cell_id.as_deref()
    }

    pub fn run_id(&self) -> Option<&str> {
        self.state.cell_info()?.run_id.as_deref()
    }

    pub fn user(&self) -> Option<&str> {
        self.state.user.as_deref()
    }

    pub fn refresh_count(&self) -> u32 {
        self.refresh_count
    }

    pub fn canceling(&self) -> bool {
        self.canceling
    }

    pub fn logs(&self) -> &[LogLine] {
        &self.logs
    }

    pub fn last_refresh_ms(&self) -> Option<i64> {
        self.last_refresh_ms
    }

    /// Merges a fresh backend state. An update for another job is rejected untouched.
    pub fn merge_state(&mut self, update: JobState, now_ms: i64) -> Result<(), RecordError> {
        if let Some(actual) = update.job_id.as_ref()
            && actual != &self.job_id
        {
            return Err(RecordError::JobIdMismatch {
                expected: self.job_id.clone(),
                actual: actual.clone(),
            });
        }
        self.state.merge(update);
        self.last_refresh_ms = Some(now_ms);
        Ok(())
    }

    pub fn mark_refreshed(&mut self, now_ms: i64) {
        self.last_refresh_ms = Some(now_ms);
    }

    pub fn add_listener(&mut self) -> u32 {
        self.refresh_count = self.refresh_count.saturating_add(1);
        self.refresh_count
    }

    pub fn remove_listener(&mut self) -> u32 {
        self.refresh_count = self.refresh_count.saturating_sub(1);
        self.refresh_count
    }

    pub fn set_refresh_count(&mut self, refresh_count: u32) {
        self.refresh_count = refresh_count;
    }

    pub fn set_canceling(&mut self, canceling: bool) {
        self.canceling = canceling;
    }

    /// Links a retry of a batch child into this parent.
    pub fn push_child(&mut self, child: JobId) -> Result<(), RecordError> {
        if !self.is_batch_parent() {
            return Err(RecordError::NotBatchParent(self.job_id.clone()));
        }
        if !self.children.contains(&child) {
            self.children.push(child.clone());
        }
        let reported = self.state.child_jobs.get_or_insert_with(Vec::new);
        if !reported.contains(&child) {
            reported.push(child);
        }
        Ok(())
    }

    pub fn push_retry_id(&mut self, retry_id: JobId) {
        let retry_ids = self.state.retry_ids.get_or_insert_with(Vec::new);
        if !retry_ids.contains(&retry_id) {
            retry_ids.push(retry_id);
        }
    }

    pub fn append_logs(&mut self, lines: Vec<LogLine>) {
        self.logs.extend(lines);
    }
}

fn verify_children(
    job_id: &JobId,
    state: &JobState,
    supplied: &[JobId],
) -> Result<(), RecordError> {
    let mut expected = state.child_jobs.clone().unwrap_or_default();
    let mut got = supplied.to_vec();
    expected.sort();
    got.sort();
    if expected != got {
        return Err(RecordError::ChildMismatch {
            job_id: job_id.clone(),
            expected,
            supplied: got,
        });
    }
    Ok(())
}
