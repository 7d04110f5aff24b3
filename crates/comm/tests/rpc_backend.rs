#![forbid(unsafe_code)]

mod support;

use jobtrack_comm::RpcBackend;
use jobtrack_core::model::EXCLUDED_JOB_STATE_FIELDS;
use jobtrack_core::{Backend, BackendError, JobId, JobStatus, RetryOutcome};
use serde_json::{Value, json};
use support::{FIXTURE_BACKEND, job, temp_dir, write_fixture};

fn id(raw: &str) -> JobId {
    JobId::try_new(raw).expect("job id")
}

fn backend(test_name: &str, fixture: &Value) -> RpcBackend {
    let dir = temp_dir(test_name);
    let path = write_fixture(&dir, fixture);
    RpcBackend::spawn(FIXTURE_BACKEND, &[path.to_string_lossy().into_owned()]).expect("spawn")
}

#[test]
fn bulk_lookup_omits_unknown_jobs_and_excluded_fields() {
    let fixture = json!({"jobs": [job("a", "running"), job("b", "error")]});
    let mut backend = backend("rpc_bulk", &fixture);

    let states = backend
        .check_jobs(&[id("a"), id("b"), id("ghost")], EXCLUDED_JOB_STATE_FIELDS)
        .expect("check_jobs");

    assert_eq!(states.len(), 2);
    assert_eq!(states[&id("a")].status, Some(JobStatus::Running));
    assert_eq!(states[&id("b")].status, Some(JobStatus::Error));
    assert!(states[&id("a")].job_input.is_none());
}

#[test]
fn server_errors_keep_code_and_message() {
    let mut backend = backend("rpc_errors", &json!({"jobs": [], "fail_methods": ["retry_jobs"]}));

    let err = backend.check_job(&id("ghost"), &[]).unwrap_err();
    assert_eq!(err.code(), Some(-32000));
    assert_eq!(err.name(), "JSONRPCError");
    assert_eq!(err.detail(), "Cannot find job with id ghost");

    let err = backend.retry_jobs(&[id("ghost")]).unwrap_err();
    assert_eq!(err.detail(), "retry_jobs failed");
}

#[test]
fn cancel_and_cancel_check() {
    let mut backend = backend("rpc_cancel", &json!({"jobs": [job("a", "running")]}));

    let check = backend.check_job_canceled(&id("a")).expect("check");
    assert!(!check.finished);
    backend.cancel_jobs(&[id("a")]).expect("cancel");
    let check = backend.check_job_canceled(&id("a")).expect("check");
    assert!(check.finished && check.canceled);
}

#[test]
fn retry_outcomes() {
    let mut backend = backend(
        "rpc_retry",
        &json!({"jobs": [job("a", "error"), job("b", "error")], "retry_rejects": ["b"]}),
    );

    let outcomes = backend.retry_jobs(&[id("a"), id("b")]).expect("retry");

    assert_eq!(
        outcomes[0],
        RetryOutcome::Retried {
            job_id: id("a"),
            retry_id: id("a-retry1"),
        }
    );
    assert!(matches!(&outcomes[1], RetryOutcome::Rejected { job_id, .. } if job_id == &id("b")));
    let retry = backend.check_job(&id("a-retry1"), &[]).expect("retry state");
    assert_eq!(retry.retry_parent, Some(id("a")));
}

#[test]
fn logs_skip_cached_lines() {
    let fixture = json!({"jobs": [job("a", "running")], "logs": {"a": 12}});
    let mut backend = backend("rpc_logs", &fixture);

    let chunk = backend.get_job_logs(&id("a"), 10).expect("logs");

    assert_eq!(chunk.total, 12);
    assert_eq!(chunk.lines.len(), 2);
    assert_eq!(chunk.lines[0].line, "line 10");
    assert!(!chunk.lines[0].is_error);
}

#[test]
fn submissions() {
    let mut backend = backend("rpc_submit", &json!({"jobs": []}));

    let job_id = backend.run_job(&json!({"method": "Module.run"})).expect("run_job");
    assert_eq!(job_id, id("job-1"));

    let batch = backend
        .run_job_batch(&[json!({}), json!({})], &json!({"wsid": 1}))
        .expect("run_job_batch");
    assert_eq!(batch.child_job_ids.len(), 2);
    let parent = backend.check_job(&batch.batch_id, &[]).expect("parent");
    assert_eq!(parent.batch_job, Some(true));
    assert_eq!(parent.child_jobs, Some(batch.child_job_ids.clone()));
}

#[test]
fn spawn_failure_is_a_transport_error() {
    let err = RpcBackend::spawn("/nonexistent/jobtrack-bridge", &[])
        .err()
        .expect("spawn should fail");
    assert!(matches!(err, BackendError::Transport(_)));
}
