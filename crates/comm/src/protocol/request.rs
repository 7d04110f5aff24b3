#![forbid(unsafe_code)]

use super::CommError;
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestType {
    AllStatus,
    JobStatus,
    JobInfo,
    CancelJob,
    RetryJob,
    JobLogs,
    StartJobUpdate,
    StopJobUpdate,
    StartUpdateLoop,
    StopUpdateLoop,
}

/// How a request addresses jobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdScope {
    None,
    /// One job per request; lists are split into independent requests.
    Single,
    /// The whole list is handled as one unit.
    List,
}

impl RequestType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "all_status" => Some(Self::AllStatus),
            "job_status" | "job_state" => Some(Self::JobStatus),
            "job_info" => Some(Self::JobInfo),
            "cancel_job" => Some(Self::CancelJob),
            "retry_job" => Some(Self::RetryJob),
            "job_logs" => Some(Self::JobLogs),
            "start_job_update" => Some(Self::StartJobUpdate),
            "stop_job_update" => Some(Self::StopJobUpdate),
            "start_update_loop" => Some(Self::StartUpdateLoop),
            "stop_update_loop" => Some(Self::StopUpdateLoop),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AllStatus => "all_status",
            Self::JobStatus => "job_status",
            Self::JobInfo => "job_info",
            Self::CancelJob => "cancel_job",
            Self::RetryJob => "retry_job",
            Self::JobLogs => "job_logs",
            Self::StartJobUpdate => "start_job_update",
            Self::StopJobUpdate => "stop_job_update",
            Self::StartUpdateLoop => "start_update_loop",
            Self::StopUpdateLoop => "stop_update_loop",
        }
    }

    pub fn id_scope(self) -> IdScope {
        match self {
            Self::AllStatus | Self::StartUpdateLoop | Self::StopUpdateLoop => IdScope::None,
            Self::RetryJob | Self::StartJobUpdate | Self::StopJobUpdate => IdScope::List,
            Self::JobStatus | Self::JobInfo | Self::CancelJob | Self::JobLogs => IdScope::Single,
        }
    }
}

/// One inbound channel request, already validated for shape.
#[derive(Clone, Debug, PartialEq)]
pub struct JobRequest {
    pub msg_id: Option<String>,
    pub request_type: RequestType,
    /// The request name exactly as sent; echoed back as `source` in error payloads.
    pub request: String,
    pub job_id: Option<String>,
    pub job_id_list: Option<Vec<Option<String>>>,
    pub data: Map<String, Value>,
}

impl JobRequest {
    /// Parses `{msg_id?, content: {data: {request_type, job_id?, job_id_list?, ...}}}`.
    pub fn parse(message: &Value) -> Result<Self, CommError> {
        let data = message
            .get("content")
            .and_then(|content| content.get("data"))
            .and_then(Value::as_object)
            .ok_or(CommError::Malformed)?;
        let request = data
            .get("request_type")
            .and_then(Value::as_str)
            .ok_or(CommError::MissingRequestType)?;
        let request_type = RequestType::parse(request)
            .ok_or_else(|| CommError::UnknownRequest(request.to_string()))?;

        let msg_id = message.get("msg_id").and_then(|id| match id {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        });
        let job_id = data.get("job_id").and_then(id_string);
        let job_id_list = match data.get("job_id_list") {
            Some(Value::Array(items)) => Some(items.iter().map(id_string).collect()),
            Some(Value::Null) | None => None,
            Some(other) => Some(vec![id_string(other)]),
        };

        Ok(Self {
            msg_id,
            request_type,
            request: request.to_string(),
            job_id,
            job_id_list,
            data: data.clone(),
        })
    }

    /// Normalizes job addressing for dispatch.
    ///
    /// Single-job requests carrying a list become one request per entry; list requests carrying a
    /// single id get a one-element list.
    pub fn translate(self) -> Vec<JobRequest> {
        match self.request_type.id_scope() {
            IdScope::None => vec![self],
            IdScope::Single => match self.job_id_list.clone() {
                Some(list) if self.job_id.is_none() && !list.is_empty() => list
                    .into_iter()
                    .map(|job_id| JobRequest {
                        job_id,
                        job_id_list: None,
                        ..self.clone()
                    })
                    .collect(),
                _ => vec![JobRequest {
                    job_id_list: None,
                    ..self
                }],
            },
            IdScope::List => match (self.job_id_list.is_some(), self.job_id.clone()) {
                (false, Some(job_id)) => vec![JobRequest {
                    job_id: None,
                    job_id_list: Some(vec![Some(job_id)]),
                    ..self
                }],
                _ => vec![JobRequest {
                    job_id: None,
                    ..self
                }],
            },
        }
    }

    pub fn first_line(&self) -> Option<i64> {
        self.data.get("first_line").and_then(Value::as_i64)
    }

    pub fn num_lines(&self) -> Option<i64> {
        self.data.get("num_lines").and_then(Value::as_i64)
    }

    pub fn latest(&self) -> bool {
        self.flag("latest")
    }

    pub fn ignore_refresh_flag(&self) -> bool {
        self.flag("ignore_refresh_flag")
    }

    fn flag(&self, key: &str) -> bool {
        match self.data.get(key) {
            Some(Value::Bool(v)) => *v,
            Some(Value::Number(n)) => n.as_i64().is_some_and(|v| v != 0),
            _ => false,
        }
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
