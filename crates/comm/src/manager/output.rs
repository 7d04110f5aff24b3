#![forbid(unsafe_code)]

use crate::support::ts_ms_to_rfc3339;
use jobtrack_core::{JobId, JobRecord, JobStatus};
use serde_json::{Map, Value, json};

/// Front-end view of one job: `{job_id, state, listener_count}`.
///
/// The state is the cached backend state with excluded fields removed, plus the context fields the
/// front end needs to route it (`batch_id`, `cell_id`, `run_id`).
pub fn job_status_content(record: &JobRecord) -> Value {
    let mut state = record.state().to_output_value();
    if let Value::Object(map) = &mut state {
        map.insert("job_id".to_string(), json!(record.job_id()));
        map.insert("status".to_string(), json!(record.status()));
        map.insert("batch_id".to_string(), json!(record.batch_id()));
        map.insert("cell_id".to_string(), json!(record.cell_id()));
        map.insert("run_id".to_string(), json!(record.run_id()));
    }
    json!({
        "job_id": record.job_id(),
        "state": state,
        "user": record.user(),
        "listener_count": record.refresh_count(),
    })
}

pub fn does_not_exist_content(job_id: &JobId) -> Value {
    json!({
        "job_id": job_id,
        "state": {"job_id": job_id, "status": JobStatus::DoesNotExist},
        "listener_count": 0,
    })
}

pub fn job_info_content(record: &JobRecord) -> Value {
    let mut out = Map::new();
    out.insert("job_id".to_string(), json!(record.job_id()));
    out.insert("app_id".to_string(), json!(record.app_id()));
    out.insert("app_version".to_string(), json!(record.app_version()));
    out.insert("tag".to_string(), json!(record.tag().as_str()));
    out.insert("batch_id".to_string(), json!(record.batch_id()));
    out.insert("batch_job".to_string(), json!(record.is_batch_parent()));
    out.insert("child_jobs".to_string(), json!(record.children()));
    out.insert("retry_ids".to_string(), json!(record.retry_ids()));
    out.insert("retry_parent".to_string(), json!(record.retry_parent()));
    out.insert("cell_id".to_string(), json!(record.cell_id()));
    out.insert("run_id".to_string(), json!(record.run_id()));
    out.insert("user".to_string(), json!(record.user()));
    out.insert(
        "job_params".to_string(),
        record.params().cloned().unwrap_or(Value::Null),
    );
    out.insert("status".to_string(), json!(record.status()));
    out.insert(
        "last_refresh".to_string(),
        record
            .last_refresh_ms()
            .map(|ms| Value::String(ts_ms_to_rfc3339(ms)))
            .unwrap_or(Value::Null),
    );
    Value::Object(out)
}
