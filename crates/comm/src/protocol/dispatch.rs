#![forbid(unsafe_code)]

use super::{CommError, CommSink, JobRequest, Message, MsgType, RequestType};
use crate::manager::{JobManager, ManagerError, RetryPair};
use crate::status_loop::StatusLoop;
use jobtrack_core::{Backend, BatchSubmission, JobId};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const PROCESS_ERROR: &str = "Unable to process job channel message";
const CANCEL_ERROR: &str = "Unable to cancel job";
const RETRY_ERROR: &str = "Unable to retry job(s)";
const LOGS_ERROR: &str = "Unable to retrieve job logs";
const SUBMIT_ERROR: &str = "Unable to submit job";

/// Routes front-end requests to the job manager and owns the periodic status loop.
pub struct JobComm<B, S> {
    manager: JobManager<B>,
    sink: S,
    status_loop: StatusLoop,
}

impl<B: Backend, S: CommSink> JobComm<B, S> {
    pub fn new(manager: JobManager<B>, sink: S, interval: Duration) -> Self {
        Self {
            manager,
            sink,
            status_loop: StatusLoop::new(interval),
        }
    }

    pub fn manager(&self) -> &JobManager<B> {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut JobManager<B> {
        &mut self.manager
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn status_loop(&self) -> &StatusLoop {
        &self.status_loop
    }

    /// Handles one inbound channel message.
    ///
    /// A list addressed to a single-job request is split, and each part is answered on its own;
    /// the first failure is returned after every part has run. A closed outbound channel aborts
    /// at once.
    pub fn handle_message(&mut self, message: &Value) -> Result<(), CommError> {
        let request = match JobRequest::parse(message) {
            Ok(request) => request,
            Err(err) => {
                let source = message
                    .pointer("/content/data/request_type")
                    .cloned()
                    .unwrap_or(Value::Null);
                self.send(
                    MsgType::JobCommError,
                    json!({"source": source, "error": PROCESS_ERROR, "message": err.to_string()}),
                )?;
                return Err(err);
            }
        };

        let mut first_err = None;
        for request in request.translate() {
            if let Err(err) = self.handle_request(&request) {
                if err.is_channel_closed() {
                    return Err(err);
                }
                warn!(
                    request = %request.request,
                    kind = err.kind().as_str(),
                    error = %err,
                    "job channel request failed"
                );
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Answers an inbound line that is not JSON at all.
    pub fn reject_unparseable(&mut self, detail: &str) -> Result<(), CommError> {
        self.send(
            MsgType::JobCommError,
            json!({"source": Value::Null, "error": PROCESS_ERROR, "message": detail}),
        )
    }

    pub fn handle_request(&mut self, request: &JobRequest) -> Result<(), CommError> {
        debug!(request = %request.request, msg_id = ?request.msg_id, "job channel request");
        match request.request_type {
            RequestType::AllStatus => {
                let states = self
                    .manager
                    .lookup_all_job_states(request.ignore_refresh_flag());
                self.send(MsgType::JobStatusAll, status_map(states))
            }
            RequestType::JobStatus => {
                let job_id = self.require_job_id(request)?;
                let state = self.manager.lookup_job_state(&job_id)?;
                self.send(MsgType::JobStatus, state)
            }
            RequestType::JobInfo => {
                let job_id = self.require_job_id(request)?;
                let info = self.manager.job_info(&job_id)?;
                self.send(MsgType::JobInfo, info)
            }
            RequestType::CancelJob => {
                let job_id = self.require_job_id(request)?;
                match self.manager.cancel_job(&job_id) {
                    Ok(state) => self.send(MsgType::JobStatus, state),
                    Err(err) => {
                        self.send_comm_error(
                            request,
                            json!({"job_id": job_id}),
                            CANCEL_ERROR,
                            &err,
                        )?;
                        Err(err.into())
                    }
                }
            }
            RequestType::RetryJob => self.retry(request),
            RequestType::JobLogs => {
                let job_id = self.require_job_id(request)?;
                let result = self.manager.get_job_logs(
                    &job_id,
                    request.first_line(),
                    request.num_lines(),
                    request.latest(),
                );
                match result {
                    Ok(slice) => self.send(MsgType::JobLogs, json!(slice)),
                    Err(err) => {
                        self.send_comm_error(request, json!({"job_id": job_id}), LOGS_ERROR, &err)?;
                        Err(err.into())
                    }
                }
            }
            RequestType::StartJobUpdate => {
                let (job_ids, missing) = self.require_job_ids(request)?;
                if !job_ids.is_empty() {
                    for job_id in &job_ids {
                        self.manager.start_listening(job_id)?;
                    }
                    let now = Instant::now();
                    self.status_loop.start(now);
                    if !self.poll_status(now)? {
                        let states = self.manager.lookup_all_job_states(false);
                        self.send(MsgType::JobStatusAll, status_map(states))?;
                    }
                }
                missing.map_or(Ok(()), Err)
            }
            RequestType::StopJobUpdate => {
                let (job_ids, missing) = self.require_job_ids(request)?;
                for job_id in &job_ids {
                    self.manager.stop_listening(job_id)?;
                }
                if !self.manager.has_listeners() {
                    self.status_loop.stop();
                }
                missing.map_or(Ok(()), Err)
            }
            RequestType::StartUpdateLoop => {
                let now = Instant::now();
                self.status_loop.start(now);
                self.poll_status(now)?;
                Ok(())
            }
            RequestType::StopUpdateLoop => {
                self.status_loop.stop();
                Ok(())
            }
        }
    }

    /// Starts the status loop without emitting anything; the first tick is due immediately.
    pub fn start_status_loop(&mut self, now: Instant) {
        self.status_loop.start(now);
    }

    /// Runs one status tick if the loop is running and due. Returns whether a tick ran.
    pub fn poll_status(&mut self, now: Instant) -> Result<bool, CommError> {
        let Some(mut tick) = self.status_loop.begin_tick(now) else {
            return Ok(false);
        };
        let states = self.manager.lookup_all_job_states(false);
        self.sink
            .send(Message::new(MsgType::JobStatusAll, status_map(states)))?;
        if !self.manager.has_listeners() {
            tick.stop_loop();
        }
        Ok(true)
    }

    /// Starts a job and announces it with `new_job`.
    pub fn submit_job(&mut self, params: &Value) -> Result<JobId, CommError> {
        match self.manager.submit_job(params) {
            Ok(job_id) => {
                self.send(MsgType::NewJob, json!({"job_id": job_id}))?;
                Ok(job_id)
            }
            Err(err) => {
                self.send_submit_error("run_job", &err)?;
                Err(err.into())
            }
        }
    }

    /// Starts a batch and announces the parent with `new_job`.
    pub fn submit_batch(
        &mut self,
        jobs: &[Value],
        batch_params: &Value,
    ) -> Result<BatchSubmission, CommError> {
        match self.manager.submit_batch(jobs, batch_params) {
            Ok(submission) => {
                self.send(
                    MsgType::NewJob,
                    json!({
                        "job_id": submission.batch_id,
                        "child_job_ids": submission.child_job_ids,
                    }),
                )?;
                Ok(submission)
            }
            Err(err) => {
                self.send_submit_error("run_job_batch", &err)?;
                Err(err.into())
            }
        }
    }

    fn retry(&mut self, request: &JobRequest) -> Result<(), CommError> {
        let raw = request.job_id_list.clone().unwrap_or_default();
        let job_ids = JobId::dedupe_valid(raw.iter().map(Option::as_deref));
        if job_ids.is_empty() {
            self.send(
                MsgType::JobDoesNotExist,
                json!({"job_id_list": [], "source": request.request}),
            )?;
            return Err(ManagerError::NoValidJobIds.into());
        }

        match self
            .manager
            .retry_jobs(job_ids.iter().map(|job_id| Some(job_id.as_str())))
        {
            Ok(report) => self.send_retries(&report.retried),
            Err(ManagerError::JobsNotFound { job_ids, retried }) => {
                if !retried.is_empty() {
                    self.send_retries(&retried)?;
                }
                self.send(
                    MsgType::JobDoesNotExist,
                    json!({"job_id_list": job_ids, "source": request.request}),
                )?;
                Err(ManagerError::JobsNotFound { job_ids, retried }.into())
            }
            Err(err) => {
                self.send_comm_error(request, json!({"job_id_list": job_ids}), RETRY_ERROR, &err)?;
                Err(err.into())
            }
        }
    }

    /// Resolves the request's job id, answering `job_does_not_exist` when it is missing or unknown.
    fn require_job_id(&mut self, request: &JobRequest) -> Result<JobId, CommError> {
        let Some(job_id) = request
            .job_id
            .as_deref()
            .and_then(|raw| JobId::try_new(raw).ok())
        else {
            self.send(
                MsgType::JobDoesNotExist,
                json!({"job_id": Value::Null, "source": request.request}),
            )?;
            return Err(CommError::JobIdRequired(request.request.clone()));
        };
        if !self.manager.store().contains(&job_id) {
            self.send(
                MsgType::JobDoesNotExist,
                json!({"job_id": job_id, "source": request.request}),
            )?;
            return Err(ManagerError::JobNotFound(job_id).into());
        }
        Ok(job_id)
    }

    /// Resolves a subscription list. Unknown ids are answered with `job_does_not_exist` one by
    /// one and reported as the returned error; the known ids are still returned.
    fn require_job_ids(
        &mut self,
        request: &JobRequest,
    ) -> Result<(Vec<JobId>, Option<CommError>), CommError> {
        let raw = request.job_id_list.clone().unwrap_or_default();
        let job_ids = JobId::dedupe_valid(raw.iter().map(Option::as_deref));
        if job_ids.is_empty() {
            self.send(
                MsgType::JobDoesNotExist,
                json!({"job_id": Value::Null, "source": request.request}),
            )?;
            return Err(CommError::JobIdRequired(request.request.clone()));
        }

        let (known, unknown): (Vec<_>, Vec<_>) = job_ids
            .into_iter()
            .partition(|job_id| self.manager.store().contains(job_id));
        let mut missing: Option<CommError> = None;
        for job_id in unknown {
            self.send(
                MsgType::JobDoesNotExist,
                json!({"job_id": job_id, "source": request.request}),
            )?;
            missing.get_or_insert(ManagerError::JobNotFound(job_id).into());
        }
        Ok((known, missing))
    }

    fn send_retries(&mut self, retried: &[RetryPair]) -> Result<(), CommError> {
        let retry_ids = retried
            .iter()
            .map(|pair| pair.retry_id.clone())
            .collect::<Vec<_>>();
        self.send(
            MsgType::NewJob,
            json!({"job_id_list": retry_ids, "retried": retried}),
        )
    }

    fn send_comm_error(
        &mut self,
        request: &JobRequest,
        target: Value,
        summary: &str,
        err: &ManagerError,
    ) -> Result<(), CommError> {
        let mut content = match target {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        content.insert("source".to_string(), json!(request.request));
        content.insert("error".to_string(), json!(summary));
        content.insert(
            "message".to_string(),
            json!(err.backend_detail().unwrap_or_else(|| err.to_string())),
        );
        self.send(MsgType::JobCommError, Value::Object(content))
    }

    fn send_submit_error(&mut self, source: &str, err: &ManagerError) -> Result<(), CommError> {
        self.send(
            MsgType::JobCommError,
            json!({
                "job_id": Value::Null,
                "source": source,
                "error": SUBMIT_ERROR,
                "message": err.backend_detail().unwrap_or_else(|| err.to_string()),
            }),
        )
    }

    fn send(&mut self, msg_type: MsgType, content: Value) -> Result<(), CommError> {
        self.sink.send(Message::new(msg_type, content))?;
        Ok(())
    }
}

fn status_map(states: BTreeMap<JobId, Value>) -> Value {
    Value::Object(
        states
            .into_iter()
            .map(|(job_id, state)| (job_id.into_string(), state))
            .collect(),
    )
}
