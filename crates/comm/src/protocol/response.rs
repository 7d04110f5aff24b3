#![forbid(unsafe_code)]

use serde_json::{Value, json};
use std::io::Write;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MsgType {
    JobStatus,
    JobStatusAll,
    JobInfo,
    JobLogs,
    JobCommError,
    JobDoesNotExist,
    NewJob,
}

impl MsgType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JobStatus => "job_status",
            Self::JobStatusAll => "job_status_all",
            Self::JobInfo => "job_info",
            Self::JobLogs => "job_logs",
            Self::JobCommError => "job_comm_error",
            Self::JobDoesNotExist => "job_does_not_exist",
            Self::NewJob => "new_job",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub msg_type: MsgType,
    pub content: Value,
}

impl Message {
    pub fn new(msg_type: MsgType, content: Value) -> Self {
        Self { msg_type, content }
    }

    pub fn to_value(&self) -> Value {
        json!({ "msg_type": self.msg_type.as_str(), "content": self.content })
    }
}

/// Outbound half of the front-end channel.
pub trait CommSink {
    fn send(&mut self, message: Message) -> std::io::Result<()>;
}

/// Writes one `{msg_type, content}` JSON object per line.
pub struct LineSink<W: Write> {
    out: W,
}

impl<W: Write> LineSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> CommSink for LineSink<W> {
    fn send(&mut self, message: Message) -> std::io::Result<()> {
        let line = serde_json::to_string(&message.to_value())?;
        writeln!(self.out, "{line}")?;
        self.out.flush()
    }
}

/// Keeps every message in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub messages: Vec<Message>,
}

impl RecordingSink {
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn of_type(&self, msg_type: MsgType) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|message| message.msg_type == msg_type)
            .collect()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

impl CommSink for RecordingSink {
    fn send(&mut self, message: Message) -> std::io::Result<()> {
        self.messages.push(message);
        Ok(())
    }
}
