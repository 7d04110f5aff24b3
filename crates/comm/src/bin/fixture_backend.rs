#![forbid(unsafe_code)]

//! JSON-RPC backend bridge serving jobs from a fixture file. Used by the integration tests.
//!
//! Fixture shape: `{"jobs": [state...], "logs": {job_id: line_count}, "retry_rejects": [job_id],
//! "fail_methods": [method]}`.

use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufRead, Write};

struct RpcFailure {
    code: i64,
    message: String,
}

impl RpcFailure {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Default)]
struct Fixture {
    jobs: BTreeMap<String, Value>,
    logs: BTreeMap<String, u64>,
    retry_rejects: BTreeSet<String>,
    fail_methods: BTreeSet<String>,
    next_id: u64,
}

impl Fixture {
    fn load(raw: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(raw)?;
        let mut fixture = Self::default();
        for job in value.get("jobs").and_then(Value::as_array).into_iter().flatten() {
            if let Some(job_id) = job.get("job_id").and_then(Value::as_str) {
                fixture.jobs.insert(job_id.to_string(), job.clone());
            }
        }
        if let Some(logs) = value.get("logs").and_then(Value::as_object) {
            for (job_id, count) in logs {
                fixture
                    .logs
                    .insert(job_id.clone(), count.as_u64().unwrap_or(0));
            }
        }
        fixture.retry_rejects = string_set(value.get("retry_rejects"));
        fixture.fail_methods = string_set(value.get("fail_methods"));
        Ok(fixture)
    }

    fn handle(&mut self, method: &str, params: &Value) -> Result<Value, RpcFailure> {
        if self.fail_methods.contains(method) {
            return Err(RpcFailure::new(-32000, format!("{method} failed")));
        }
        match method {
            "check_job" => {
                let job_id = str_param(params, "job_id")?;
                self.lookup(job_id, &exclude_fields(params))
                    .ok_or_else(|| not_found(job_id))
            }
            "check_jobs" => {
                let exclude = exclude_fields(params);
                let mut out = Map::new();
                for job_id in list_param(params, "job_ids")? {
                    if let Some(state) = self.lookup(&job_id, &exclude) {
                        out.insert(job_id, state);
                    }
                }
                Ok(Value::Object(out))
            }
            "check_job_canceled" => {
                let job_id = str_param(params, "job_id")?;
                let status = self.status(job_id);
                Ok(json!({
                    "job_id": job_id,
                    "finished": matches!(
                        status.as_deref(),
                        Some("completed" | "terminated" | "error")
                    ),
                    "canceled": status.as_deref() == Some("terminated"),
                }))
            }
            "cancel_job" => {
                let job_id = str_param(params, "job_id")?.to_string();
                let state = self
                    .jobs
                    .get_mut(&job_id)
                    .ok_or_else(|| not_found(&job_id))?;
                state["status"] = json!("terminated");
                Ok(Value::Null)
            }
            "retry_jobs" => {
                let out = list_param(params, "job_ids")?
                    .into_iter()
                    .map(|job_id| self.retry(job_id))
                    .collect();
                Ok(Value::Array(out))
            }
            "get_job_logs" => {
                let job_id = str_param(params, "job_id")?;
                let skip = params.get("skip_lines").and_then(Value::as_u64).unwrap_or(0);
                let total = self.logs.get(job_id).copied().unwrap_or(0);
                let lines = (skip..total)
                    .map(|n| json!({"line": format!("line {n}"), "is_error": 0}))
                    .collect::<Vec<_>>();
                Ok(json!({"lines": lines, "last_line_number": total}))
            }
            "run_job" => {
                let job_id = self.create_job(params.clone(), None);
                Ok(json!({"job_id": job_id}))
            }
            "run_job_batch" => {
                let batch_params = params.get("batch_params").cloned().unwrap_or(Value::Null);
                let batch_id = self.create_job(batch_params, None);
                let jobs = params
                    .get("jobs")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let child_job_ids = jobs
                    .into_iter()
                    .map(|job| self.create_job(job, Some(batch_id.as_str())))
                    .collect::<Vec<_>>();
                if let Some(parent) = self.jobs.get_mut(&batch_id) {
                    parent["batch_job"] = json!(true);
                    parent["status"] = json!("created");
                    parent["child_jobs"] = json!(child_job_ids);
                }
                Ok(json!({"batch_id": batch_id, "child_job_ids": child_job_ids}))
            }
            other => Err(RpcFailure::new(-32601, format!("Method not found: {other}"))),
        }
    }

    fn lookup(&self, job_id: &str, exclude: &[String]) -> Option<Value> {
        let mut state = self.jobs.get(job_id)?.clone();
        if let Some(obj) = state.as_object_mut() {
            for field in exclude {
                obj.remove(field);
            }
        }
        Some(state)
    }

    fn status(&self, job_id: &str) -> Option<String> {
        self.jobs
            .get(job_id)?
            .get("status")?
            .as_str()
            .map(str::to_string)
    }

    fn retry(&mut self, job_id: String) -> Value {
        if self.retry_rejects.contains(&job_id) {
            return json!({"job_id": job_id, "error": "Job cannot be retried"});
        }
        let Some(original) = self.jobs.get(&job_id).cloned() else {
            return json!({"job_id": job_id, "error": format!("Cannot find job with id {job_id}")});
        };

        self.next_id += 1;
        let retry_id = format!("{job_id}-retry{}", self.next_id);
        let mut retry = original.clone();
        retry["job_id"] = json!(retry_id);
        retry["status"] = json!("queued");
        retry["retry_parent"] = json!(job_id);
        if let Some(obj) = retry.as_object_mut() {
            obj.remove("retry_ids");
            obj.remove("finished");
        }
        self.jobs.insert(retry_id.clone(), retry);

        if let Some(state) = self.jobs.get_mut(&job_id) {
            push_to_list(state, "retry_ids", &retry_id);
        }
        if let Some(batch_id) = original.get("batch_id").and_then(Value::as_str)
            && let Some(batch) = self.jobs.get_mut(batch_id)
        {
            push_to_list(batch, "child_jobs", &retry_id);
        }
        json!({"job_id": job_id, "retry_id": retry_id})
    }

    fn create_job(&mut self, params: Value, batch_id: Option<&str>) -> String {
        self.next_id += 1;
        let job_id = format!("job-{}", self.next_id);
        let mut state = json!({
            "job_id": job_id,
            "status": "queued",
            "user": "fixture",
            "job_input": {"app_id": "Fixture/app", "service_ver": "1.0.0", "params": params},
        });
        if let Some(batch_id) = batch_id {
            state["batch_id"] = json!(batch_id);
        }
        self.jobs.insert(job_id.clone(), state);
        job_id
    }
}

fn not_found(job_id: &str) -> RpcFailure {
    RpcFailure::new(-32000, format!("Cannot find job with id {job_id}"))
}

fn string_set(value: Option<&Value>) -> BTreeSet<String> {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}

fn str_param<'a>(params: &'a Value, key: &str) -> Result<&'a str, RpcFailure> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| RpcFailure::new(-32602, format!("Invalid params: missing {key}")))
}

fn list_param(params: &Value, key: &str) -> Result<Vec<String>, RpcFailure> {
    let items = params
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| RpcFailure::new(-32602, format!("Invalid params: missing {key}")))?;
    Ok(items
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect())
}

fn exclude_fields(params: &Value) -> Vec<String> {
    string_set(params.get("exclude_fields")).into_iter().collect()
}

fn push_to_list(state: &mut Value, key: &str, item: &str) {
    let Some(obj) = state.as_object_mut() else {
        return;
    };
    let list = obj.entry(key).or_insert_with(|| json!([]));
    if let Some(items) = list.as_array_mut() {
        items.push(json!(item));
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .ok_or("usage: jobtrack_fixture_backend <fixture.json>")?;
    let mut fixture = Fixture::load(&std::fs::read_to_string(&path)?)?;

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout().lock();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let resp = match serde_json::from_str::<Value>(&line) {
            Ok(req) => {
                let id = req.get("id").cloned().unwrap_or(Value::Null);
                let method = req.get("method").and_then(Value::as_str).unwrap_or_default();
                let params = req.get("params").cloned().unwrap_or(Value::Null);
                match fixture.handle(method, &params) {
                    Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
                    Err(err) => json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": err.code, "name": "JSONRPCError", "message": err.message},
                    }),
                }
            }
            Err(e) => json!({
                "jsonrpc": "2.0",
                "id": null,
                "error": {"code": -32700, "message": format!("Parse error: {e}")},
            }),
        };
        writeln!(stdout, "{resp}")?;
        stdout.flush()?;
    }
    Ok(())
}
