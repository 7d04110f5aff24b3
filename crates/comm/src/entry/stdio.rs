#![forbid(unsafe_code)]

use crate::protocol::{CommError, CommSink, JobComm};
use jobtrack_core::Backend;
use serde_json::Value;
use std::io::{BufRead, BufReader};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Upper bound on a single stdin wait while the status loop is stopped.
const IDLE_WAIT: Duration = Duration::from_secs(60);

/// Serves the front-end channel on stdin/stdout until EOF.
///
/// Stdin is polled with a timeout equal to the time until the next status tick, so requests and
/// the polling cycle share one thread and never overlap.
pub fn run_stdio<B: Backend, S: CommSink>(
    comm: &mut JobComm<B, S>,
) -> Result<(), Box<dyn std::error::Error>> {
    let stdin = std::io::stdin();
    let mut reader = BufReader::new(stdin.lock());

    loop {
        comm.poll_status(Instant::now())?;

        #[cfg(unix)]
        {
            use std::os::fd::AsFd;

            let wait = comm
                .status_loop()
                .time_until_due(Instant::now())
                .unwrap_or(IDLE_WAIT);
            if reader.buffer().is_empty()
                && !super::poll::wait_fd_readable(reader.get_ref().as_fd(), wait)
            {
                continue;
            }
        }

        let mut buf = Vec::new();
        let read = reader.read_until(b'\n', &mut buf)?;
        if read == 0 {
            info!("job channel closed");
            break;
        }
        let line = match String::from_utf8(buf) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "job channel message is not utf-8");
                comm.reject_unparseable(&format!("Parse error: {e}"))?;
                continue;
            }
        };
        let raw = line.trim();
        if raw.is_empty() {
            continue;
        }
        handle_line(comm, raw)?;
    }

    Ok(())
}

fn handle_line<B: Backend, S: CommSink>(
    comm: &mut JobComm<B, S>,
    raw: &str,
) -> Result<(), CommError> {
    let message: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "unparseable job channel message");
            return comm.reject_unparseable(&format!("Parse error: {e}"));
        }
    };

    match comm.handle_message(&message) {
        Err(err) if err.is_channel_closed() => Err(err),
        Err(err) => {
            // Already answered on the channel.
            debug!(kind = err.kind().as_str(), error = %err, "job channel message failed");
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}
