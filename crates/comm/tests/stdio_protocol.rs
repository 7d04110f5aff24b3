#![forbid(unsafe_code)]

mod support;

use serde_json::{Value, json};
use std::process::Command;
use support::{Session, job};

#[test]
fn startup_reports_listened_jobs_then_answers_requests() {
    let fixture = json!({"jobs": [job("a", "running"), job("b", "completed")]});
    let mut session = Session::start("startup", &fixture, &["--job-id", "a,b"]);

    let first = session.recv();
    assert_eq!(first["msg_type"], "job_status_all");
    let all = first["content"].as_object().expect("status map");
    assert_eq!(all.len(), 1);
    assert_eq!(first["content"]["a"]["state"]["status"], "running");
    assert!(first["content"]["a"]["state"].get("job_input").is_none());

    session.request(json!({"request_type": "job_status", "job_id": "b"}));
    let status = session.recv();
    assert_eq!(status["msg_type"], "job_status");
    assert_eq!(status["content"]["state"]["status"], "completed");
    assert_eq!(status["content"]["listener_count"], 0);

    assert!(session.finish().success());
}

#[test]
fn malformed_input_is_answered_and_the_session_continues() {
    let mut session = Session::start("malformed", &json!({"jobs": []}), &[]);

    session.send_raw("this is not json");
    let err = session.recv_type("job_comm_error");
    assert_eq!(err["error"], "Unable to process job channel message");
    assert!(err["message"].as_str().unwrap_or_default().starts_with("Parse error"));

    session.send(json!({"content": {}}));
    let err = session.recv_type("job_comm_error");
    assert_eq!(err["message"], "Improperly formatted job channel message!");

    session.request(json!({"request_type": "no_such_request"}));
    let err = session.recv_type("job_comm_error");
    assert_eq!(err["source"], "no_such_request");

    session.send_bytes(b"\xff\xfe not utf8\n");
    let err = session.recv_type("job_comm_error");
    assert_eq!(err["source"], Value::Null);
    assert!(err["message"].as_str().unwrap_or_default().starts_with("Parse error"));

    session.send_raw("");
    session.request(json!({"request_type": "all_status"}));
    assert_eq!(session.recv_type("job_status_all"), json!({}));
}

#[test]
fn cancel_over_the_channel() {
    let fixture = json!({"jobs": [job("a", "running")]});
    let mut session = Session::start("cancel", &fixture, &["--job-id", "a"]);
    session.recv_type("job_status_all");

    session.request(json!({"request_type": "cancel_job", "job_id": "a"}));
    let status = session.recv_type("job_status");
    assert_eq!(status["job_id"], "a");
    assert_eq!(status["state"]["status"], "terminated");
}

#[test]
fn cancel_failure_is_reported_with_backend_detail() {
    let fixture = json!({"jobs": [job("a", "running")], "fail_methods": ["cancel_job"]});
    let mut session = Session::start("cancel_fail", &fixture, &["--job-id", "a"]);
    session.recv_type("job_status_all");

    session.request(json!({"request_type": "cancel_job", "job_id": "a"}));
    let err = session.recv_type("job_comm_error");
    assert_eq!(
        err,
        json!({
            "job_id": "a",
            "source": "cancel_job",
            "error": "Unable to cancel job",
            "message": "cancel_job failed",
        })
    );
}

#[test]
fn retry_over_the_channel_tracks_the_new_job() {
    let fixture = json!({"jobs": [job("c", "error")]});
    let mut session = Session::start("retry", &fixture, &["--job-id", "c"]);

    session.request(json!({"request_type": "retry_job", "job_id_list": ["c"]}));
    let new_job = session.recv_type("new_job");
    assert_eq!(new_job["job_id_list"], json!(["c-retry1"]));
    assert_eq!(
        new_job["retried"],
        json!([{"job_id": "c", "retry_id": "c-retry1"}])
    );

    session.request(json!({"request_type": "job_info", "job_id": "c-retry1"}));
    let info = session.recv_type("job_info");
    assert_eq!(info["retry_parent"], "c");
    assert_eq!(info["app_id"], "Module/app");
    assert_eq!(info["status"], "queued");

    session.request(json!({"request_type": "retry_job", "job_id_list": ["ghost"]}));
    let missing = session.recv_type("job_does_not_exist");
    assert_eq!(missing, json!({"job_id_list": ["ghost"], "source": "retry_job"}));
}

#[test]
fn latest_logs_over_the_channel() {
    let fixture = json!({"jobs": [job("a", "running")], "logs": {"a": 50}});
    let mut session = Session::start("logs", &fixture, &["--job-id", "a"]);
    session.recv_type("job_status_all");

    session.request(json!({
        "request_type": "job_logs",
        "job_id": "a",
        "num_lines": 10,
        "latest": true,
    }));
    let logs = session.recv_type("job_logs");
    assert_eq!(logs["first"], 40);
    assert_eq!(logs["max_lines"], 50);
    assert_eq!(logs["lines"].as_array().map(Vec::len), Some(10));
    assert_eq!(logs["lines"][0]["line"], "line 40");
}

#[test]
fn job_lists_are_answered_per_job() {
    let fixture = json!({"jobs": [job("a", "running")]});
    let mut session = Session::start("split", &fixture, &["--job-id", "a"]);
    session.recv_type("job_status_all");

    session.request(json!({"request_type": "job_status", "job_id_list": ["a", "ghost"]}));
    let status = session.recv();
    assert_eq!(status["msg_type"], "job_status");
    assert_eq!(status["content"]["job_id"], "a");
    let missing = session.recv();
    assert_eq!(missing["msg_type"], "job_does_not_exist");
    assert_eq!(missing["content"], json!({"job_id": "ghost", "source": "job_status"}));
}

#[test]
fn job_updates_start_and_stop_the_status_loop() {
    let fixture = json!({"jobs": [job("b", "completed")]});
    let mut session = Session::start("updates", &fixture, &["--job-id", "b"]);

    session.request(json!({"request_type": "start_job_update", "job_id": "b"}));
    let all = session.recv();
    assert_eq!(all["msg_type"], "job_status_all");
    assert_eq!(all["content"]["b"]["listener_count"], 1);

    session.request(json!({"request_type": "stop_job_update", "job_id": "b"}));
    session.request(json!({"request_type": "all_status"}));
    let all = session.recv();
    assert_eq!(all["msg_type"], "job_status_all");
    assert_eq!(all["content"], json!({}));
}

#[test]
fn status_loop_ticks_on_its_interval() {
    let fixture = json!({"jobs": [job("a", "running")]});
    let mut session = Session::start(
        "ticks",
        &fixture,
        &["--job-id", "a", "--poll-interval-ms", "100"],
    );

    for _ in 0..3 {
        let all = session.recv_type("job_status_all");
        assert_eq!(all["a"]["state"]["status"], "running");
    }
}

#[test]
fn backend_outage_at_startup_is_fatal() {
    let fixture = json!({"jobs": [job("a", "running")], "fail_methods": ["check_jobs"]});
    let mut session = Session::start("init_fail", &fixture, &["--job-id", "a"]);
    assert!(!session.finish().success());
}

#[test]
fn cli_help_exits_zero() {
    let output = Command::new(env!("CARGO_BIN_EXE_jobtrack"))
        .arg("--help")
        .output()
        .expect("run jobtrack --help");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--backend-cmd"));
    assert!(stdout.contains("--batch-policy"));
}
