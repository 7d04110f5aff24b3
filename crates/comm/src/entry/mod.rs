#![forbid(unsafe_code)]

#[cfg(unix)]
mod poll;
mod stdio;

pub use stdio::run_stdio;
