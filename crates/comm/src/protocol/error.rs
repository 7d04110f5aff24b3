#![forbid(unsafe_code)]

use crate::manager::ManagerError;

/// Error taxonomy shared by every channel failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed request or missing job id; never reaches the backend.
    Validation,
    /// Job id unknown to this session.
    NotFound,
    /// Backend call failed.
    Remote,
    /// Bulk operation where only some ids succeeded.
    PartialFailure,
    InvariantViolation,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Remote => "remote",
            Self::PartialFailure => "partial_failure",
            Self::InvariantViolation => "invariant_violation",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommError {
    #[error("Improperly formatted job channel message!")]
    Malformed,
    #[error("Missing request type in job channel message!")]
    MissingRequestType,
    #[error("Unknown request '{0}'")]
    UnknownRequest(String),
    #[error("Job id required to process {0} request")]
    JobIdRequired(String),
    #[error(transparent)]
    Manager(#[from] ManagerError),
    #[error("job channel write failed: {0}")]
    Channel(#[from] std::io::Error),
}

impl CommError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Malformed
            | Self::MissingRequestType
            | Self::UnknownRequest(_)
            | Self::JobIdRequired(_) => ErrorKind::Validation,
            Self::Manager(err) => err.kind(),
            Self::Channel(_) => ErrorKind::Remote,
        }
    }

    /// Whether the outbound channel itself is gone and the session should end.
    pub fn is_channel_closed(&self) -> bool {
        matches!(self, Self::Channel(_))
    }
}
