#![forbid(unsafe_code)]
#![allow(dead_code)]

use serde_json::{Value, json};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};

pub(crate) const FIXTURE_BACKEND: &str = env!("CARGO_BIN_EXE_jobtrack_fixture_backend");

/// A running `jobtrack` session backed by the fixture bridge.
pub(crate) struct Session {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    dir: PathBuf,
}

impl Session {
    pub(crate) fn start(test_name: &str, fixture: &Value, extra_args: &[&str]) -> Self {
        let dir = temp_dir(test_name);
        let fixture_path = write_fixture(&dir, fixture);
        let has_interval = extra_args
            .iter()
            .any(|arg| arg.trim() == "--poll-interval-ms");
        let default_interval: &[&str] = if has_interval {
            &[]
        } else {
            &["--poll-interval-ms", "600000"]
        };

        let mut child = Command::new(env!("CARGO_BIN_EXE_jobtrack"))
            .arg("--backend-cmd")
            .arg(FIXTURE_BACKEND)
            .arg("--backend-arg")
            .arg(&fixture_path)
            .args(default_interval)
            .args(extra_args)
            .env("RUST_LOG", "warn")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .expect("spawn jobtrack");

        let stdin = child.stdin.take().expect("stdin");
        let stdout = BufReader::new(child.stdout.take().expect("stdout"));

        Self {
            child,
            stdin: Some(stdin),
            stdout,
            dir,
        }
    }

    pub(crate) fn send_raw(&mut self, line: &str) {
        let stdin = self.stdin.as_mut().expect("stdin open");
        writeln!(stdin, "{line}").expect("write request");
        stdin.flush().expect("flush request");
    }

    pub(crate) fn send_bytes(&mut self, bytes: &[u8]) {
        let stdin = self.stdin.as_mut().expect("stdin open");
        stdin.write_all(bytes).expect("write request");
        stdin.flush().expect("flush request");
    }

    pub(crate) fn send(&mut self, req: Value) {
        self.send_raw(&req.to_string());
    }

    /// Sends a job channel request built from `data` (must include `request_type`).
    pub(crate) fn request(&mut self, data: Value) {
        self.send(json!({"msg_id": "test", "content": {"data": data}}));
    }

    pub(crate) fn recv(&mut self) -> Value {
        let mut line = String::new();
        self.stdout.read_line(&mut line).expect("read message");
        assert!(!line.trim().is_empty(), "empty message line");
        serde_json::from_str(&line).expect("parse message json")
    }

    /// Reads messages until one of `msg_type` arrives and returns its content.
    pub(crate) fn recv_type(&mut self, msg_type: &str) -> Value {
        loop {
            let message = self.recv();
            if message["msg_type"] == msg_type {
                return message["content"].clone();
            }
        }
    }

    /// Closes stdin and waits for the session to end.
    pub(crate) fn finish(&mut self) -> ExitStatus {
        drop(self.stdin.take());
        self.child.wait().expect("wait jobtrack")
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

pub(crate) fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let dir = base.join(format!("jobtrack_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

pub(crate) fn write_fixture(dir: &Path, fixture: &Value) -> PathBuf {
    let path = dir.join("fixture.json");
    std::fs::write(&path, fixture.to_string()).expect("write fixture");
    path
}

pub(crate) fn job(job_id: &str, status: &str) -> Value {
    json!({
        "job_id": job_id,
        "status": status,
        "user": "tester",
        "authstrat": "kbaseworkspace",
        "job_input": {
            "app_id": "Module/app",
            "service_ver": "1.0.0",
            "params": [{"input": job_id}],
            "narrative_cell_info": {"cell_id": "cell-1", "run_id": "run-1", "tag": "release"}
        }
    })
}
