#![forbid(unsafe_code)]

mod store;

pub use store::{BatchTerminalPolicy, InitReport, JobStore, StoreError};
