#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const MAX_JOB_ID_LEN: usize = 256;

/// Opaque backend job identifier. Always trimmed and non-empty.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn try_new(value: impl Into<String>) -> Result<Self, JobIdError> {
        let value = value.into();
        let trimmed = value.trim();
        validate_job_id(trimmed)?;
        if trimmed.len() == value.len() {
            Ok(Self(value))
        } else {
            Ok(Self(trimmed.to_string()))
        }
    }

    /// Keeps the first occurrence of every valid id, in input order.
    ///
    /// Empty and otherwise invalid entries are dropped silently; callers decide whether an
    /// all-invalid input is an error.
    pub fn dedupe_valid<'a, I>(raw: I) -> Vec<JobId>
    where
        I: IntoIterator<Item = Option<&'a str>>,
    {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for item in raw.into_iter().flatten() {
            let Ok(id) = JobId::try_new(item) else {
                continue;
            };
            if seen.insert(id.clone()) {
                out.push(id);
            }
        }
        out
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::borrow::Borrow<str> for JobId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for JobId {
    type Error = JobIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_new(value)
    }
}

impl From<JobId> for String {
    fn from(value: JobId) -> Self {
        value.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobIdError {
    Empty,
    TooLong,
    ContainsControl,
}

impl JobIdError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Empty => "job id must not be empty",
            Self::TooLong => "job id is too long",
            Self::ContainsControl => "job id contains control characters",
        }
    }
}

impl std::fmt::Display for JobIdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for JobIdError {}

fn validate_job_id(value: &str) -> Result<(), JobIdError> {
    if value.is_empty() {
        return Err(JobIdError::Empty);
    }
    if value.len() > MAX_JOB_ID_LEN {
        return Err(JobIdError::TooLong);
    }
    if value.chars().any(|c| c.is_control()) {
        return Err(JobIdError::ContainsControl);
    }
    Ok(())
}
