#![forbid(unsafe_code)]

//! Job tracking for a notebook-style front end: a polling coordinator over a backend job service,
//! a scheduled status loop, and the request/response protocol spoken on the job channel.

pub mod config;
pub mod entry;
pub mod logging;
pub mod manager;
pub mod protocol;
pub mod rpc_backend;
pub mod status_loop;
mod support;

pub use config::Config;
pub use manager::{JobManager, ManagerError};
pub use protocol::{CommError, JobComm};
pub use rpc_backend::RpcBackend;
