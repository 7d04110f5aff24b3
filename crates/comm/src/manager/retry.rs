#![forbid(unsafe_code)]

use super::{JobManager, ManagerError};
use crate::support::now_ms_i64;
use jobtrack_core::model::JOB_INIT_EXCLUDED_JOB_STATE_FIELDS;
use jobtrack_core::{Backend, JobId, JobRecord, JobState, JobStatus, RetryOutcome};
use jobtrack_storage::StoreError;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RetryPair {
    pub job_id: JobId,
    pub retry_id: JobId,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub retried: Vec<RetryPair>,
    pub rejected: Vec<JobId>,
}

impl<B: Backend> JobManager<B> {
    /// Retries jobs in one backend request.
    ///
    /// Ids unknown to the session never reach the backend. When anything is rejected the call
    /// fails with `JobsNotFound`, which still carries the accepted retries.
    pub fn retry_jobs<'a, I>(&mut self, job_ids: I) -> Result<RetryReport, ManagerError>
    where
        I: IntoIterator<Item = Option<&'a str>>,
    {
        let job_ids = JobId::dedupe_valid(job_ids);
        if job_ids.is_empty() {
            return Err(ManagerError::NoValidJobIds);
        }

        let (known, mut rejected): (Vec<_>, Vec<_>) = job_ids
            .into_iter()
            .partition(|job_id| self.store.contains(job_id));
        let mut retried = Vec::new();

        if !known.is_empty() {
            let outcomes =
                self.backend
                    .retry_jobs(&known)
                    .map_err(|source| ManagerError::RetryFailed {
                        job_ids: known.clone(),
                        source,
                    })?;
            let mut answered = Vec::with_capacity(outcomes.len());
            for outcome in outcomes {
                answered.push(outcome.job_id().clone());
                match outcome {
                    RetryOutcome::Retried { job_id, retry_id } => {
                        retried.push(RetryPair { job_id, retry_id });
                    }
                    RetryOutcome::Rejected { job_id, reason } => {
                        warn!(job_id = %job_id, reason = %reason, "retry rejected by backend");
                        rejected.push(job_id);
                    }
                }
            }
            for job_id in &known {
                if !answered.contains(job_id) {
                    warn!(job_id = %job_id, "backend returned no retry result");
                    rejected.push(job_id.clone());
                }
            }
            self.register_retries(&retried);
        }

        if rejected.is_empty() {
            Ok(RetryReport { retried, rejected })
        } else {
            Err(ManagerError::JobsNotFound {
                job_ids: rejected,
                retried,
            })
        }
    }

    fn register_retries(&mut self, retried: &[RetryPair]) {
        if retried.is_empty() {
            return;
        }
        let retry_ids = retried
            .iter()
            .map(|pair| pair.retry_id.clone())
            .collect::<Vec<_>>();
        let mut states = self
            .backend
            .check_jobs(&retry_ids, JOB_INIT_EXCLUDED_JOB_STATE_FIELDS)
            .unwrap_or_else(|err| {
                warn!(error = %err, "could not fetch retried job states; using placeholders");
                BTreeMap::new()
            });
        let now_ms = now_ms_i64();

        for pair in retried {
            let state = states
                .remove(&pair.retry_id)
                .unwrap_or_else(|| self.placeholder_retry_state(pair));
            if let Err(err) = self.register_retry(pair, state, now_ms) {
                warn!(
                    job_id = %pair.job_id,
                    retry_id = %pair.retry_id,
                    error = %err,
                    "retried job not tracked"
                );
            }
        }
    }

    fn register_retry(
        &mut self,
        pair: &RetryPair,
        mut state: JobState,
        now_ms: i64,
    ) -> Result<(), StoreError> {
        if state.retry_parent.is_none() {
            state.retry_parent = Some(pair.job_id.clone());
        }
        let children = state.is_batch_job().then(|| {
            state
                .child_jobs
                .iter()
                .flatten()
                .filter(|child| self.store.contains(child))
                .cloned()
                .collect::<Vec<_>>()
        });
        let mut record = JobRecord::new(state, children)?;
        record.mark_refreshed(now_ms);
        let batch_id = record
            .batch_id()
            .filter(|batch_id| *batch_id != record.job_id())
            .cloned();
        self.store.register(record.with_refresh_count(1))?;
        self.store.link_retry(&pair.job_id, &pair.retry_id)?;

        if let Some(batch_id) = batch_id {
            if self.store.is_completed(&batch_id) {
                info!(
                    batch_id = %batch_id,
                    retry_id = %pair.retry_id,
                    "batch already completed; retry tracked standalone"
                );
            } else {
                self.store.attach_child(&batch_id, &pair.retry_id)?;
            }
        }
        info!(job_id = %pair.job_id, retry_id = %pair.retry_id, "job retried");
        Ok(())
    }

    fn placeholder_retry_state(&self, pair: &RetryPair) -> JobState {
        let mut state = JobState::new(pair.retry_id.clone(), JobStatus::Created);
        state.retry_parent = Some(pair.job_id.clone());
        if let Ok(original) = self.store.get(&pair.job_id) {
            state.batch_id = original.state().batch_id.clone();
            state.job_input = original.state().job_input.clone();
            state.user = original.state().user.clone();
        }
        state
    }
}
