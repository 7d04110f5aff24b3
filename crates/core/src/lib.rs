#![forbid(unsafe_code)]

pub mod backend;
pub mod ids;
pub mod model;
pub mod record;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backend::{Backend, BackendError, BatchSubmission, CancelCheck, LogChunk, RetryOutcome};
pub use ids::{JobId, JobIdError};
pub use model::{AppTag, JobState, JobStatus, LogLine};
pub use record::{JobRecord, RecordError};
