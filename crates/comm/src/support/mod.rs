#![forbid(unsafe_code)]

mod time;

pub(crate) use time::*;
