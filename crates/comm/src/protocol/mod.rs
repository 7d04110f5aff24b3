#![forbid(unsafe_code)]

//! Front-end channel protocol: request parsing, dispatch onto the job manager, response emission.

mod dispatch;
mod error;
mod request;
mod response;


pub use dispatch::JobComm;
pub use error::{CommError, ErrorKind};
pub use request::{IdScope, JobRequest, RequestType};
pub use response::{CommSink, LineSink, Message, MsgType, RecordingSink};
