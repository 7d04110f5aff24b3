#![forbid(unsafe_code)]

//! Polling coordinator: owns the job store and the backend connection.

mod cancel;
mod error;
mod logs;
mod output;
mod retry;
mod submit;


pub use error::ManagerError;
pub use logs::LogSlice;
pub use output::{does_not_exist_content, job_info_content, job_status_content};
pub use retry::{RetryPair, RetryReport};

use crate::support::now_ms_i64;
use jobtrack_core::model::EXCLUDED_JOB_STATE_FIELDS;
use jobtrack_core::{Backend, JobId};
use jobtrack_storage::{InitReport, JobStore};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

pub struct JobManager<B> {
    backend: B,
    store: JobStore,
}

impl<B: Backend> JobManager<B> {
    pub fn new(backend: B, store: JobStore) -> Self {
        Self { backend, store }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Session start: loads the known jobs in one bulk call. A backend outage here is fatal.
    pub fn initialize_jobs(
        &mut self,
        known_ids: &[JobId],
        cell_ids: Option<&BTreeSet<String>>,
    ) -> Result<InitReport, ManagerError> {
        let report =
            self.store
                .initialize_from_backend(&mut self.backend, known_ids, cell_ids, now_ms_i64())?;
        Ok(report)
    }

    pub fn has_listeners(&self) -> bool {
        self.store.has_listeners()
    }

    pub fn start_listening(&mut self, job_id: &JobId) -> Result<u32, ManagerError> {
        self.require_known(job_id)?;
        Ok(self.store.start_listening(job_id)?)
    }

    pub fn stop_listening(&mut self, job_id: &JobId) -> Result<u32, ManagerError> {
        self.require_known(job_id)?;
        Ok(self.store.stop_listening(job_id)?)
    }

    /// States for every job someone is listening to (every job with the flag set).
    ///
    /// Completed jobs are answered from cache; everything else is refreshed with at most one bulk
    /// backend call.
    pub fn lookup_all_job_states(&mut self, ignore_refresh_flag: bool) -> BTreeMap<JobId, Value> {
        let candidates = self
            .store
            .records()
            .filter(|record| ignore_refresh_flag || record.refresh_count() > 0)
            .map(|record| record.job_id().clone())
            .collect::<Vec<_>>();
        self.refresh_and_report(&candidates)
    }

    pub fn lookup_job_state(&mut self, job_id: &JobId) -> Result<Value, ManagerError> {
        self.require_known(job_id)?;
        let mut states = self.refresh_and_report(std::slice::from_ref(job_id));
        Ok(states
            .remove(job_id)
            .unwrap_or_else(|| does_not_exist_content(job_id)))
    }

    pub fn job_info(&self, job_id: &JobId) -> Result<Value, ManagerError> {
        let record = self
            .store
            .get(job_id)
            .map_err(|_| ManagerError::JobNotFound(job_id.clone()))?;
        Ok(job_info_content(record))
    }

    fn require_known(&self, job_id: &JobId) -> Result<(), ManagerError> {
        if self.store.contains(job_id) {
            Ok(())
        } else {
            Err(ManagerError::JobNotFound(job_id.clone()))
        }
    }

    /// Refreshes the non-completed `candidates` (and the non-completed children of any batch
    /// parent among them) with a single `check_jobs`, then reports every candidate.
    ///
    /// Ids the backend leaves out of a successful response are reported as `does_not_exist` for
    /// this round only. A failed call leaves the cache untouched.
    fn refresh_and_report(&mut self, candidates: &[JobId]) -> BTreeMap<JobId, Value> {
        let mut seen = BTreeSet::new();
        let mut to_refresh = Vec::new();
        for job_id in candidates {
            let Ok(record) = self.store.get(job_id) else {
                continue;
            };
            if self.store.is_completed(job_id) {
                continue;
            }
            if seen.insert(job_id.clone()) {
                to_refresh.push(job_id.clone());
            }
            for child in record.children() {
                if !self.store.is_completed(child) && seen.insert(child.clone()) {
                    to_refresh.push(child.clone());
                }
            }
        }

        let mut missing = BTreeSet::new();
        if !to_refresh.is_empty() {
            debug!(jobs = to_refresh.len(), "refreshing job states");
            match self
                .backend
                .check_jobs(&to_refresh, EXCLUDED_JOB_STATE_FIELDS)
            {
                Ok(mut states) => {
                    let now_ms = now_ms_i64();
                    for job_id in &to_refresh {
                        let Some(state) = states.remove(job_id) else {
                            missing.insert(job_id.clone());
                            continue;
                        };
                        if let Err(err) = self.store.merge_state(job_id, state, now_ms) {
                            warn!(job_id = %job_id, error = %err, "job state update rejected");
                        }
                    }
                    self.store.promote_terminal();
                }
                Err(err) => {
                    warn!(
                        jobs = to_refresh.len(),
                        error = %err,
                        "job state refresh failed; serving cached states"
                    );
                }
            }
        }

        candidates
            .iter()
            .filter_map(|job_id| {
                if missing.contains(job_id) {
                    return Some((job_id.clone(), does_not_exist_content(job_id)));
                }
                let record = self.store.get(job_id).ok()?;
                Some((job_id.clone(), job_status_content(record)))
            })
            .collect()
    }
}
