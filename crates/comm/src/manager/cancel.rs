#![forbid(unsafe_code)]

use super::{JobManager, ManagerError, does_not_exist_content, job_status_content};
use jobtrack_core::{Backend, BackendError, JobId};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

impl<B: Backend> JobManager<B> {
    pub fn cancel_job(&mut self, job_id: &JobId) -> Result<Value, ManagerError> {
        let mut states = self.cancel_jobs([Some(job_id.as_str())])?;
        Ok(states
            .remove(job_id)
            .unwrap_or_else(|| does_not_exist_content(job_id)))
    }

    /// Cancels every listed job that is still running and reports the resulting states.
    ///
    /// Unknown ids map to the `does_not_exist` state and terminal jobs answer from cache; neither
    /// reaches the backend. Jobs the backend reports as already finished are refreshed instead
    /// of canceled. All remaining cancels go out in one `cancel_jobs` call.
    pub fn cancel_jobs<'a, I>(
        &mut self,
        job_ids: I,
    ) -> Result<BTreeMap<JobId, Value>, ManagerError>
    where
        I: IntoIterator<Item = Option<&'a str>>,
    {
        let job_ids = JobId::dedupe_valid(job_ids);
        if job_ids.is_empty() {
            return Err(ManagerError::NoValidJobIds);
        }

        let mut out = BTreeMap::new();
        let mut pending: Vec<(JobId, u32)> = Vec::new();
        for job_id in job_ids {
            if !self.store.contains(&job_id) {
                out.insert(job_id.clone(), does_not_exist_content(&job_id));
                continue;
            }
            if self.store.is_terminal_id(&job_id)? {
                let record = self.store.get(&job_id)?;
                out.insert(job_id.clone(), job_status_content(record));
                continue;
            }
            let record = self.store.active_mut(&job_id)?;
            if record.canceling() {
                debug!(job_id = %job_id, "cancel already in flight");
                continue;
            }
            let previous_refresh = record.refresh_count();
            record.set_canceling(true);
            record.set_refresh_count(0);
            pending.push((job_id, previous_refresh));
        }

        if pending.is_empty() {
            return Ok(out);
        }

        let result = self.submit_cancels(&pending);

        for (job_id, previous_refresh) in &pending {
            if let Ok(record) = self.store.active_mut(job_id) {
                record.set_canceling(false);
                record.set_refresh_count(*previous_refresh);
            }
        }

        let pending_ids = pending.into_iter().map(|(job_id, _)| job_id).collect::<Vec<_>>();
        if let Err(source) = result {
            warn!(error = %source, "job cancel failed");
            return Err(ManagerError::CancelFailed {
                job_ids: pending_ids,
                source,
            });
        }

        out.extend(self.refresh_and_report(&pending_ids));
        Ok(out)
    }

    fn submit_cancels(&mut self, pending: &[(JobId, u32)]) -> Result<(), BackendError> {
        let mut to_cancel = Vec::new();
        for (job_id, _) in pending {
            let check = self.backend.check_job_canceled(job_id)?;
            if check.finished {
                debug!(
                    job_id = %job_id,
                    canceled = check.canceled,
                    "job already finished; skipping cancel"
                );
            } else {
                to_cancel.push(job_id.clone());
            }
        }
        if to_cancel.is_empty() {
            return Ok(());
        }
        self.backend.cancel_jobs(&to_cancel)?;
        info!(jobs = to_cancel.len(), "jobs canceled");
        Ok(())
    }
}
