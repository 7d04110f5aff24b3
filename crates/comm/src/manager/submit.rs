#![forbid(unsafe_code)]

use super::{JobManager, ManagerError};
use crate::support::now_ms_i64;
use jobtrack_core::model::JOB_INIT_EXCLUDED_JOB_STATE_FIELDS;
use jobtrack_core::{Backend, BatchSubmission, JobId, JobRecord, JobState, JobStatus};
use jobtrack_storage::StoreError;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, warn};

impl<B: Backend> JobManager<B> {
    /// Starts a job and begins tracking it with one listener.
    pub fn submit_job(&mut self, params: &Value) -> Result<JobId, ManagerError> {
        let job_id = self
            .backend
            .run_job(params)
            .map_err(ManagerError::SubmitFailed)?;
        let state = self
            .backend
            .check_job(&job_id, JOB_INIT_EXCLUDED_JOB_STATE_FIELDS)
            .unwrap_or_else(|err| {
                warn!(job_id = %job_id, error = %err, "initial state unavailable for new job");
                JobState::new(job_id.clone(), JobStatus::Created)
            });
        self.track_new(state, None)?;
        info!(job_id = %job_id, "job submitted");
        Ok(job_id)
    }

    /// Starts a batch; the children are registered before their parent.
    pub fn submit_batch(
        &mut self,
        jobs: &[Value],
        batch_params: &Value,
    ) -> Result<BatchSubmission, ManagerError> {
        let submission = self
            .backend
            .run_job_batch(jobs, batch_params)
            .map_err(ManagerError::SubmitFailed)?;

        let mut all_ids = Vec::with_capacity(submission.child_job_ids.len() + 1);
        all_ids.push(submission.batch_id.clone());
        all_ids.extend(submission.child_job_ids.iter().cloned());
        let mut states = self
            .backend
            .check_jobs(&all_ids, JOB_INIT_EXCLUDED_JOB_STATE_FIELDS)
            .unwrap_or_else(|err| {
                warn!(
                    batch_id = %submission.batch_id,
                    error = %err,
                    "initial batch states unavailable"
                );
                BTreeMap::new()
            });

        for child_id in &submission.child_job_ids {
            let state = states.remove(child_id).unwrap_or_else(|| {
                let mut state = JobState::new(child_id.clone(), JobStatus::Created);
                state.batch_id = Some(submission.batch_id.clone());
                state
            });
            self.track_new(state, None)?;
        }

        let parent = states.remove(&submission.batch_id).unwrap_or_else(|| {
            let mut state = JobState::new(submission.batch_id.clone(), JobStatus::Created);
            state.batch_job = Some(true);
            state.child_jobs = Some(submission.child_job_ids.clone());
            state
        });
        self.track_new(parent, Some(submission.child_job_ids.clone()))?;
        info!(
            batch_id = %submission.batch_id,
            children = submission.child_job_ids.len(),
            "batch submitted"
        );
        Ok(submission)
    }

    fn track_new(
        &mut self,
        state: JobState,
        children: Option<Vec<JobId>>,
    ) -> Result<(), ManagerError> {
        let mut record = JobRecord::new(state, children).map_err(StoreError::from)?;
        record.mark_refreshed(now_ms_i64());
        self.store.register(record.with_refresh_count(1))?;
        Ok(())
    }
}
