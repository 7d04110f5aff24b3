#![forbid(unsafe_code)]

use crate::ids::JobId;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Fields dropped from every polled state; `job_input` never changes after submission.
pub const EXCLUDED_JOB_STATE_FIELDS: &[&str] = &[
    "authstrat",
    "condor_job_ads",
    "job_input",
    "scheduler_type",
    "scheduler_id",
];

/// Fields dropped from the first state fetched for a job. Keeps `job_input` for provenance.
pub const JOB_INIT_EXCLUDED_JOB_STATE_FIELDS: &[&str] = &[
    "authstrat",
    "condor_job_ads",
    "scheduler_type",
    "scheduler_id",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Queued,
    Running,
    Completed,
    Terminated,
    Error,
    DoesNotExist,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Terminated => "terminated",
            Self::Error => "error",
            Self::DoesNotExist => "does_not_exist",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "created" => Some(Self::Created),
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "terminated" => Some(Self::Terminated),
            "error" => Some(Self::Error),
            "does_not_exist" => Some(Self::DoesNotExist),
            _ => None,
        }
    }

    /// `does_not_exist` is deliberately not terminal: it is always re-checked.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Terminated | Self::Error)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppTag {
    #[default]
    Release,
    Beta,
    Dev,
}

impl AppTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Release => "release",
            Self::Beta => "beta",
            Self::Dev => "dev",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<AppTag>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(rename = "service_ver", skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narrative_cell_info: Option<CellInfo>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobErrorInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Structured snapshot of what the backend last reported for a job.
///
/// Every field is optional so that partial updates (for example a poll that excludes
/// `job_input`) can be merged without erasing previously known values; see [`JobState::merge`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<JobId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_job: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_jobs: Option<Vec<JobId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_ids: Option<Vec<JobId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_parent: Option<JobId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wsid: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminated_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errormsg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobErrorInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_input: Option<JobInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_output: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

macro_rules! merge_fields {
    ($dst:ident, $src:ident; $($field:ident),+ $(,)?) => {
        $(
            if $src.$field.is_some() {
                $dst.$field = $src.$field;
            }
        )+
    };
}

impl JobState {
    pub fn new(job_id: JobId, status: JobStatus) -> Self {
        Self {
            job_id: Some(job_id),
            status: Some(status),
            ..Self::default()
        }
    }

    /// The sentinel reported for ids the session (or backend) does not know.
    pub fn does_not_exist(job_id: JobId) -> Self {
        Self::new(job_id, JobStatus::DoesNotExist)
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Field-wise merge: present fields in `update` win, absent ones keep their value.
    ///
    /// Callers are responsible for checking that `update` describes the same job.
    pub fn merge(&mut self, update: JobState) {
        let src = update;
        let dst = self;
        merge_fields!(dst, src;
            job_id, status, batch_id, batch_job, child_jobs, retry_ids, retry_parent,
            retry_count, user, wsid, created, queued, running, finished, updated,
            terminated_code, errormsg, error_code, error, job_input, job_output,
        );
        dst.extra.extend(src.extra);
    }

    pub fn strip_fields(&mut self, fields: &[&str]) {
        for field in fields {
            if *field == "job_input" {
                self.job_input = None;
            } else {
                self.extra.remove(*field);
            }
        }
    }

    pub fn is_batch_job(&self) -> bool {
        self.batch_job.unwrap_or(false)
    }

    pub fn cell_info(&self) -> Option<&CellInfo> {
        self.job_input.as_ref()?.narrative_cell_info.as_ref()
    }

    /// JSON form handed to the front end: excluded fields removed, list/object fields defaulted.
    pub fn to_output_value(&self) -> Value {
        let mut state = self.clone();
        state.strip_fields(EXCLUDED_JOB_STATE_FIELDS);
        if state.job_output.is_none() {
            state.job_output = Some(Value::Object(Map::new()));
        }
        if state.child_jobs.is_none() {
            state.child_jobs = Some(Vec::new());
        }
        serde_json::to_value(state).unwrap_or(Value::Null)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    #[serde(default)]
    pub line: String,
    #[serde(default, deserialize_with = "flag")]
    pub is_error: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LogLine {
    pub fn new(line: impl Into<String>, is_error: bool) -> Self {
        Self {
            line: line.into(),
            is_error,
            extra: Map::new(),
        }
    }
}

/// Accepts JSON booleans as well as the 0/1 integers older services emit.
pub(crate) fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Bool(v) => Ok(v),
        Value::Number(n) => Ok(n.as_i64().is_some_and(|v| v != 0)),
        Value::Null => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "expected bool or 0/1, got {other}"
        ))),
    }
}
