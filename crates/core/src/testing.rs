#![forbid(unsafe_code)]

//! Scripted in-memory backend for tests. Every call is recorded in [`MockBackend::calls`].

use crate::backend::{Backend, BackendError, BatchSubmission, CancelCheck, LogChunk, RetryOutcome};
use crate::ids::JobId;
use crate::model::{JobState, JobStatus, LogLine};
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, PartialEq)]
pub enum BackendCall {
    CheckJob(JobId),
    CheckJobs(Vec<JobId>),
    CheckJobCanceled(JobId),
    CancelJob(JobId),
    CancelJobs(Vec<JobId>),
    RetryJobs(Vec<JobId>),
    GetJobLogs { job_id: JobId, skip_lines: u64 },
    RunJob,
    RunJobBatch(usize),
}

#[derive(Debug, Default)]
pub struct MockBackend {
    pub jobs: BTreeMap<JobId, JobState>,
    pub logs: BTreeMap<JobId, Vec<LogLine>>,
    pub cancel_checks: BTreeMap<JobId, CancelCheck>,
    /// Ids the backend refuses to retry, with the rejection reason.
    pub retry_rejects: BTreeMap<JobId, String>,
    /// Every method fails with a transport error while set.
    pub fail_all: bool,
    /// Method names (`"check_jobs"`, `"cancel_jobs"`, ...) that fail with a server error.
    pub fail_methods: BTreeSet<&'static str>,
    pub calls: Vec<BackendCall>,
    next_job: u32,
    next_retry: u32,
}

pub fn id(raw: &str) -> JobId {
    JobId::try_new(raw).unwrap_or_else(|err| panic!("invalid test job id {raw:?}: {err}"))
}

pub fn job_state(job_id: &str, status: JobStatus) -> JobState {
    JobState::from_value(json!({
        "job_id": job_id,
        "status": status,
        "user": "tester",
        "wsid": 1,
        "created": 1_600_000_000_000_i64,
        "authstrat": "kbaseworkspace",
        "job_input": {
            "app_id": "Module/app",
            "service_ver": "1.0.0",
            "params": [{"input": job_id}],
            "narrative_cell_info": {"cell_id": "cell-1", "run_id": "run-1", "tag": "release"}
        }
    }))
    .unwrap_or_else(|err| panic!("bad fixture state: {err}"))
}

pub fn batch_parent_state(job_id: &str, status: JobStatus, children: &[&str]) -> JobState {
    let mut state = job_state(job_id, status);
    state.batch_job = Some(true);
    state.child_jobs = Some(children.iter().map(|c| id(c)).collect());
    state
}

pub fn batch_child_state(job_id: &str, parent: &str, status: JobStatus) -> JobState {
    let mut state = job_state(job_id, status);
    state.batch_id = Some(id(parent));
    state
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(states: impl IntoIterator<Item = JobState>) -> Self {
        let mut backend = Self::new();
        for state in states {
            backend.insert(state);
        }
        backend
    }

    pub fn insert(&mut self, state: JobState) {
        if let Some(job_id) = state.job_id.clone() {
            self.jobs.insert(job_id, state);
        }
    }

    pub fn set_status(&mut self, job_id: &str, status: JobStatus) {
        if let Some(state) = self.jobs.get_mut(job_id) {
            state.status = Some(status);
        }
    }

    pub fn set_logs(&mut self, job_id: &str, total: usize) {
        let lines = (0..total)
            .map(|n| LogLine::new(format!("line {n}"), n % 7 == 6))
            .collect();
        self.logs.insert(id(job_id), lines);
    }

    pub fn fail(&mut self, method: &'static str) {
        self.fail_methods.insert(method);
    }

    pub fn count(&self, pred: impl Fn(&BackendCall) -> bool) -> usize {
        self.calls.iter().filter(|call| pred(call)).count()
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    fn guard(&self, method: &'static str) -> Result<(), BackendError> {
        if self.fail_all {
            return Err(BackendError::Transport("connection refused".to_string()));
        }
        if self.fail_methods.contains(method) {
            return Err(BackendError::server(
                -32000,
                "JSONRPCError",
                format!("{method} failed"),
            ));
        }
        Ok(())
    }

    fn lookup(&self, job_id: &JobId, exclude_fields: &[&str]) -> Option<JobState> {
        let mut state = self.jobs.get(job_id)?.clone();
        state.strip_fields(exclude_fields);
        Some(state)
    }
}

impl Backend for MockBackend {
    fn check_job(
        &mut self,
        job_id: &JobId,
        exclude_fields: &[&str],
    ) -> Result<JobState, BackendError> {
        self.calls.push(BackendCall::CheckJob(job_id.clone()));
        self.guard("check_job")?;
        self.lookup(job_id, exclude_fields).ok_or_else(|| {
            BackendError::server(
                -32000,
                "JSONRPCError",
                format!("Cannot find job with id {job_id}"),
            )
        })
    }

    fn check_jobs(
        &mut self,
        job_ids: &[JobId],
        exclude_fields: &[&str],
    ) -> Result<BTreeMap<JobId, JobState>, BackendError> {
        self.calls.push(BackendCall::CheckJobs(job_ids.to_vec()));
        self.guard("check_jobs")?;
        Ok(job_ids
            .iter()
            .filter_map(|job_id| Some((job_id.clone(), self.lookup(job_id, exclude_fields)?)))
            .collect())
    }

    fn check_job_canceled(&mut self, job_id: &JobId) -> Result<CancelCheck, BackendError> {
        self.calls.push(BackendCall::CheckJobCanceled(job_id.clone()));
        self.guard("check_job_canceled")?;
        if let Some(check) = self.cancel_checks.get(job_id) {
            return Ok(*check);
        }
        let status = self.jobs.get(job_id).and_then(|state| state.status);
        Ok(CancelCheck {
            finished: status.is_some_and(JobStatus::is_terminal),
            canceled: status == Some(JobStatus::Terminated),
        })
    }

    fn cancel_job(&mut self, job_id: &JobId) -> Result<(), BackendError> {
        self.calls.push(BackendCall::CancelJob(job_id.clone()));
        self.guard("cancel_job")?;
        self.set_status(job_id.as_str(), JobStatus::Terminated);
        Ok(())
    }

    fn cancel_jobs(&mut self, job_ids: &[JobId]) -> Result<(), BackendError> {
        self.calls.push(BackendCall::CancelJobs(job_ids.to_vec()));
        self.guard("cancel_jobs")?;
        for job_id in job_ids {
            self.set_status(job_id.as_str(), JobStatus::Terminated);
        }
        Ok(())
    }

    fn retry_jobs(&mut self, job_ids: &[JobId]) -> Result<Vec<RetryOutcome>, BackendError> {
        self.calls.push(BackendCall::RetryJobs(job_ids.to_vec()));
        self.guard("retry_jobs")?;
        let mut out = Vec::with_capacity(job_ids.len());
        for job_id in job_ids {
            if let Some(reason) = self.retry_rejects.get(job_id) {
                out.push(RetryOutcome::Rejected {
                    job_id: job_id.clone(),
                    reason: reason.clone(),
                });
                continue;
            }
            let Some(original) = self.jobs.get(job_id).cloned() else {
                out.push(RetryOutcome::Rejected {
                    job_id: job_id.clone(),
                    reason: "Job not found".to_string(),
                });
                continue;
            };

            self.next_retry += 1;
            let retry_id = id(&format!("{job_id}-retry{}", self.next_retry));
            let mut retry = original.clone();
            retry.job_id = Some(retry_id.clone());
            retry.status = Some(JobStatus::Queued);
            retry.retry_parent = Some(job_id.clone());
            retry.retry_ids = None;
            retry.finished = None;
            self.jobs.insert(retry_id.clone(), retry);

            if let Some(parent) = self.jobs.get_mut(job_id) {
                parent
                    .retry_ids
                    .get_or_insert_with(Vec::new)
                    .push(retry_id.clone());
                parent.retry_count = Some(parent.retry_count.unwrap_or(0) + 1);
            }
            if let Some(batch_id) = original.batch_id.as_ref()
                && let Some(batch) = self.jobs.get_mut(batch_id)
            {
                batch
                    .child_jobs
                    .get_or_insert_with(Vec::new)
                    .push(retry_id.clone());
            }

            out.push(RetryOutcome::Retried {
                job_id: job_id.clone(),
                retry_id,
            });
        }
        Ok(out)
    }

    fn get_job_logs(&mut self, job_id: &JobId, skip_lines: u64) -> Result<LogChunk, BackendError> {
        self.calls.push(BackendCall::GetJobLogs {
            job_id: job_id.clone(),
            skip_lines,
        });
        self.guard("get_job_logs")?;
        let lines = self.logs.get(job_id).cloned().unwrap_or_default();
        let total = lines.len() as u64;
        let skip = usize::try_from(skip_lines).unwrap_or(usize::MAX);
        Ok(LogChunk {
            lines: lines.into_iter().skip(skip).collect(),
            total,
        })
    }

    fn run_job(&mut self, params: &Value) -> Result<JobId, BackendError> {
        self.calls.push(BackendCall::RunJob);
        self.guard("run_job")?;
        self.next_job += 1;
        let job_id = id(&format!("job-{}", self.next_job));
        let mut state = job_state(job_id.as_str(), JobStatus::Queued);
        if let Some(input) = state.job_input.as_mut() {
            input.params = Some(params.clone());
        }
        self.jobs.insert(job_id.clone(), state);
        Ok(job_id)
    }

    fn run_job_batch(
        &mut self,
        jobs: &[Value],
        _batch_params: &Value,
    ) -> Result<BatchSubmission, BackendError> {
        self.calls.push(BackendCall::RunJobBatch(jobs.len()));
        self.guard("run_job_batch")?;
        self.next_job += 1;
        let batch_id = id(&format!("batch-{}", self.next_job));
        let mut child_job_ids = Vec::with_capacity(jobs.len());
        for (n, params) in jobs.iter().enumerate() {
            let child_id = id(&format!("{batch_id}-child{n}"));
            let mut state =
                batch_child_state(child_id.as_str(), batch_id.as_str(), JobStatus::Queued);
            if let Some(input) = state.job_input.as_mut() {
                input.params = Some(params.clone());
            }
            self.jobs.insert(child_id.clone(), state);
            child_job_ids.push(child_id);
        }
        let mut parent = job_state(batch_id.as_str(), JobStatus::Created);
        parent.batch_job = Some(true);
        parent.child_jobs = Some(child_job_ids.clone());
        self.jobs.insert(batch_id.clone(), parent);
        Ok(BatchSubmission {
            batch_id,
            child_job_ids,
        })
    }
}
