#![forbid(unsafe_code)]

mod error;
mod init;

pub use error::StoreError;
pub use init::InitReport;

use jobtrack_core::{JobId, JobRecord, JobState, JobStatus, LogLine, RecordError};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// When a batch parent counts as terminal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BatchTerminalPolicy {
    /// Terminal once every child is `completed`. A failed child keeps the parent active so it
    /// can still be retried.
    #[default]
    AllCompleted,
    /// Terminal once every child has any terminal status.
    AllSettled,
}

impl BatchTerminalPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AllCompleted => "all-completed",
            Self::AllSettled => "all-settled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "all-completed" => Some(Self::AllCompleted),
            "all-settled" => Some(Self::AllSettled),
            _ => None,
        }
    }

    fn child_settled(self, status: JobStatus) -> bool {
        match self {
            Self::AllCompleted => status == JobStatus::Completed,
            Self::AllSettled => status.is_terminal(),
        }
    }
}

/// Session-wide job records, split into an active partition (polled) and a completed one
/// (terminal, served from cache, never changes status again).
#[derive(Debug, Default)]
pub struct JobStore {
    active: BTreeMap<JobId, JobRecord>,
    completed: BTreeMap<JobId, JobRecord>,
    policy: BatchTerminalPolicy,
}

impl JobStore {
    pub fn new(policy: BatchTerminalPolicy) -> Self {
        Self {
            active: BTreeMap::new(),
            completed: BTreeMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> BatchTerminalPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.active.len() + self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty() && self.completed.is_empty()
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.active.contains_key(job_id) || self.completed.contains_key(job_id)
    }

    pub fn is_completed(&self, job_id: &JobId) -> bool {
        self.completed.contains_key(job_id)
    }

    pub fn get(&self, job_id: &JobId) -> Result<&JobRecord, StoreError> {
        self.active
            .get(job_id)
            .or_else(|| self.completed.get(job_id))
            .ok_or_else(|| StoreError::NotFound(job_id.clone()))
    }

    /// Mutable access to an active record. Completed records are immutable.
    pub fn active_mut(&mut self, job_id: &JobId) -> Result<&mut JobRecord, StoreError> {
        if self.completed.contains_key(job_id) {
            return Err(StoreError::AlreadyCompleted(job_id.clone()));
        }
        self.active
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.clone()))
    }

    /// Every record, active first, each partition in id order.
    pub fn records(&self) -> impl Iterator<Item = &JobRecord> {
        self.active.values().chain(self.completed.values())
    }

    pub fn active_ids(&self) -> Vec<JobId> {
        self.active.keys().cloned().collect()
    }

    pub fn completed_ids(&self) -> Vec<JobId> {
        self.completed.keys().cloned().collect()
    }

    /// Inserts a record into the partition matching its terminality.
    ///
    /// Re-registering an identical record is a no-op.
    pub fn register(&mut self, record: JobRecord) -> Result<(), StoreError> {
        let job_id = record.job_id().clone();
        if record.status() == JobStatus::DoesNotExist {
            return Err(StoreError::InvalidRecord(RecordError::DoesNotExist(job_id)));
        }
        if let Ok(existing) = self.get(&job_id) {
            if existing == &record {
                return Ok(());
            }
            return Err(StoreError::DuplicateJob(job_id));
        }

        let terminal = self.is_terminal(&record);
        info!(
            job_id = %job_id,
            status = %record.status(),
            terminal,
            refresh_count = record.refresh_count(),
            "job registered"
        );
        if terminal {
            self.completed.insert(job_id, record);
        } else {
            self.active.insert(job_id, record);
        }
        Ok(())
    }

    /// Terminality under the store's batch policy.
    ///
    /// A batch parent is terminal only when every child record is present and settled.
    pub fn is_terminal(&self, record: &JobRecord) -> bool {
        if record.is_batch_parent() && !record.children().is_empty() {
            return record.children().iter().all(|child| {
                self.get(child)
                    .is_ok_and(|child| self.policy.child_settled(child.status()))
            });
        }
        record.status().is_terminal()
    }

    pub fn is_terminal_id(&self, job_id: &JobId) -> Result<bool, StoreError> {
        if self.completed.contains_key(job_id) {
            return Ok(true);
        }
        let record = self.get(job_id)?;
        Ok(self.is_terminal(record))
    }

    pub fn promote_to_completed(&mut self, job_id: &JobId) -> Result<(), StoreError> {
        if self.completed.contains_key(job_id) {
            return Err(StoreError::AlreadyCompleted(job_id.clone()));
        }
        let record = self
            .active
            .get(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.clone()))?;
        if !self.is_terminal(record) {
            return Err(StoreError::NotTerminal {
                job_id: job_id.clone(),
                status: record.status(),
            });
        }
        if let Some(record) = self.active.remove(job_id) {
            info!(job_id = %job_id, status = %record.status(), "job completed");
            self.completed.insert(job_id.clone(), record);
        }
        Ok(())
    }

    /// Moves every active record that has become terminal. Returns the promoted ids.
    pub fn promote_terminal(&mut self) -> Vec<JobId> {
        let ready = self
            .active
            .values()
            .filter(|record| self.is_terminal(record))
            .map(|record| record.job_id().clone())
            .collect::<Vec<_>>();
        for job_id in &ready {
            if let Some(record) = self.active.remove(job_id) {
                info!(job_id = %job_id, status = %record.status(), "job completed");
                self.completed.insert(job_id.clone(), record);
            }
        }
        ready
    }

    /// Merges a polled state into an active record.
    pub fn merge_state(
        &mut self,
        job_id: &JobId,
        state: JobState,
        now_ms: i64,
    ) -> Result<(), StoreError> {
        if state.status == Some(JobStatus::DoesNotExist) {
            return Err(StoreError::InvalidRecord(RecordError::DoesNotExist(
                job_id.clone(),
            )));
        }
        let record = self.active_mut(job_id)?;
        record.merge_state(state, now_ms)?;
        debug!(job_id = %job_id, status = %record.status(), "job state merged");
        Ok(())
    }

    pub fn start_listening(&mut self, job_id: &JobId) -> Result<u32, StoreError> {
        let count = self.any_mut(job_id)?.add_listener();
        debug!(job_id = %job_id, refresh_count = count, "listener added");
        Ok(count)
    }

    pub fn stop_listening(&mut self, job_id: &JobId) -> Result<u32, StoreError> {
        let count = self.any_mut(job_id)?.remove_listener();
        debug!(job_id = %job_id, refresh_count = count, "listener removed");
        Ok(count)
    }

    pub fn has_listeners(&self) -> bool {
        self.records().any(|record| record.refresh_count() > 0)
    }

    /// Log caching does not touch job status, so it is allowed on completed records.
    pub fn append_logs(&mut self, job_id: &JobId, lines: Vec<LogLine>) -> Result<(), StoreError> {
        self.any_mut(job_id)?.append_logs(lines);
        Ok(())
    }

    /// Records `retry_id` as a retry of `job_id`, in either partition.
    pub fn link_retry(&mut self, job_id: &JobId, retry_id: &JobId) -> Result<(), StoreError> {
        self.any_mut(job_id)?.push_retry_id(retry_id.clone());
        Ok(())
    }

    /// Appends a retried child to its batch parent. The parent must still be active.
    pub fn attach_child(&mut self, parent_id: &JobId, child_id: &JobId) -> Result<(), StoreError> {
        self.active_mut(parent_id)?.push_child(child_id.clone())?;
        Ok(())
    }

    fn any_mut(&mut self, job_id: &JobId) -> Result<&mut JobRecord, StoreError> {
        if let Some(record) = self.active.get_mut(job_id) {
            return Ok(record);
        }
        self.completed
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.clone()))
    }
}
