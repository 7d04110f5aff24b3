#![forbid(unsafe_code)]

//! Backend client speaking newline-delimited JSON-RPC 2.0 to a bridge process over stdio.

use jobtrack_core::{
    Backend, BackendError, BatchSubmission, CancelCheck, JobId, JobState, LogChunk, RetryOutcome,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tracing::{debug, info};

const DEFAULT_ERROR_NAME: &str = "JSONRPCError";
const INTERNAL_ERROR: i64 = -32603;

pub struct RpcBackend {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: i64,
}

#[derive(Deserialize)]
struct RetryEntry {
    job_id: JobId,
    #[serde(default)]
    retry_id: Option<JobId>,
    #[serde(default)]
    error: Option<String>,
}

impl RpcBackend {
    pub fn spawn(program: &str, args: &[String]) -> Result<Self, BackendError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| {
                BackendError::Transport(format!("failed to spawn backend ({program}): {e}"))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BackendError::Transport("backend stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::Transport("backend stdout unavailable".to_string()))?;
        info!(program, pid = child.id(), "backend bridge started");

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            next_id: 1,
        })
    }

    fn send(&mut self, req: &Value) -> Result<(), BackendError> {
        writeln!(self.stdin, "{req}")
            .map_err(|e| BackendError::Transport(format!("write request failed: {e}")))?;
        self.stdin
            .flush()
            .map_err(|e| BackendError::Transport(format!("flush failed: {e}")))
    }

    fn recv(&mut self) -> Result<Value, BackendError> {
        let mut line = String::new();
        let read = self
            .stdout
            .read_line(&mut line)
            .map_err(|e| BackendError::Transport(format!("read response failed: {e}")))?;
        if read == 0 {
            return Err(BackendError::Transport(
                "backend closed the connection".to_string(),
            ));
        }
        serde_json::from_str(&line)
            .map_err(|e| BackendError::Malformed(format!("parse response json failed: {e}")))
    }

    /// One request/response round trip; JSON-RPC errors come back as `BackendError::Server`.
    fn call(&mut self, method: &str, params: Value) -> Result<Value, BackendError> {
        let id = self.next_id;
        self.next_id += 1;
        debug!(method, id, "backend request");
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))?;
        let mut resp = self.recv()?;

        if resp.get("id").and_then(Value::as_i64) != Some(id) {
            return Err(BackendError::Malformed(format!(
                "{method}: response id does not match request {id}"
            )));
        }
        if let Some(err) = resp.get("error").filter(|err| !err.is_null()) {
            return Err(server_error(err));
        }
        Ok(resp
            .as_object_mut()
            .and_then(|obj| obj.remove("result"))
            .unwrap_or(Value::Null))
    }

    fn call_decode<T: DeserializeOwned>(
        &mut self,
        method: &str,
        params: Value,
    ) -> Result<T, BackendError> {
        let result = self.call(method, params)?;
        decode(method, result)
    }
}

fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, BackendError> {
    serde_json::from_value(value)
        .map_err(|e| BackendError::Malformed(format!("{method}: unexpected result: {e}")))
}

fn server_error(err: &Value) -> BackendError {
    let code = err
        .get("code")
        .and_then(Value::as_i64)
        .unwrap_or(INTERNAL_ERROR);
    let name = err
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_ERROR_NAME);
    let message = err
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("backend error");
    BackendError::server(code, name, message)
}

impl Backend for RpcBackend {
    fn check_job(
        &mut self,
        job_id: &JobId,
        exclude_fields: &[&str],
    ) -> Result<JobState, BackendError> {
        self.call_decode(
            "check_job",
            json!({"job_id": job_id, "exclude_fields": exclude_fields}),
        )
    }

    fn check_jobs(
        &mut self,
        job_ids: &[JobId],
        exclude_fields: &[&str],
    ) -> Result<BTreeMap<JobId, JobState>, BackendError> {
        let result: Map<String, Value> = self.call_decode(
            "check_jobs",
            json!({"job_ids": job_ids, "exclude_fields": exclude_fields, "return_list": 0}),
        )?;
        let mut states = BTreeMap::new();
        for (raw_id, state) in result {
            if state.is_null() {
                continue;
            }
            let job_id = JobId::try_new(raw_id.as_str()).map_err(|e| {
                BackendError::Malformed(format!(
                    "check_jobs: bad job id {raw_id:?}: {}",
                    e.message()
                ))
            })?;
            states.insert(job_id, decode("check_jobs", state)?);
        }
        Ok(states)
    }

    fn check_job_canceled(&mut self, job_id: &JobId) -> Result<CancelCheck, BackendError> {
        self.call_decode("check_job_canceled", json!({"job_id": job_id}))
    }

    fn cancel_job(&mut self, job_id: &JobId) -> Result<(), BackendError> {
        self.call("cancel_job", json!({"job_id": job_id}))?;
        Ok(())
    }

    fn retry_jobs(&mut self, job_ids: &[JobId]) -> Result<Vec<RetryOutcome>, BackendError> {
        let entries: Vec<RetryEntry> =
            self.call_decode("retry_jobs", json!({"job_ids": job_ids}))?;
        Ok(entries
            .into_iter()
            .map(|entry| match entry.retry_id {
                Some(retry_id) => RetryOutcome::Retried {
                    job_id: entry.job_id,
                    retry_id,
                },
                None => RetryOutcome::Rejected {
                    job_id: entry.job_id,
                    reason: entry
                        .error
                        .unwrap_or_else(|| "no retry id returned".to_string()),
                },
            })
            .collect())
    }

    fn get_job_logs(&mut self, job_id: &JobId, skip_lines: u64) -> Result<LogChunk, BackendError> {
        self.call_decode(
            "get_job_logs",
            json!({"job_id": job_id, "skip_lines": skip_lines}),
        )
    }

    fn run_job(&mut self, params: &Value) -> Result<JobId, BackendError> {
        match self.call("run_job", params.clone())? {
            Value::Object(mut obj) => {
                decode("run_job", obj.remove("job_id").unwrap_or(Value::Null))
            }
            other => decode("run_job", other),
        }
    }

    fn run_job_batch(
        &mut self,
        jobs: &[Value],
        batch_params: &Value,
    ) -> Result<BatchSubmission, BackendError> {
        self.call_decode(
            "run_job_batch",
            json!({"jobs": jobs, "batch_params": batch_params}),
        )
    }
}

impl Drop for RpcBackend {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
