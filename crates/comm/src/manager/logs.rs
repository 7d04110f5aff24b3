#![forbid(unsafe_code)]

use super::{JobManager, ManagerError};
use jobtrack_core::{Backend, JobId, LogLine};
use serde::Serialize;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LogSlice {
    pub job_id: JobId,
    pub first: u64,
    pub max_lines: u64,
    pub latest: bool,
    pub lines: Vec<LogLine>,
}

impl<B: Backend> JobManager<B> {
    /// Pulls any new log lines into the job's cache, then slices the cache.
    ///
    /// `first_line` is clamped to zero and `num_lines` defaults to everything after it. With
    /// `latest`, `first_line` is ignored and the last `num_lines` lines are returned instead.
    pub fn get_job_logs(
        &mut self,
        job_id: &JobId,
        first_line: Option<i64>,
        num_lines: Option<i64>,
        latest: bool,
    ) -> Result<LogSlice, ManagerError> {
        let cached = self
            .store
            .get(job_id)
            .map_err(|_| ManagerError::JobNotFound(job_id.clone()))?
            .logs()
            .len();
        let chunk = self
            .backend
            .get_job_logs(job_id, cached as u64)
            .map_err(|source| ManagerError::LogsFailed {
                job_id: job_id.clone(),
                source,
            })?;
        debug!(
            job_id = %job_id,
            fetched = chunk.lines.len(),
            total = chunk.total,
            "job logs fetched"
        );
        if !chunk.lines.is_empty() {
            self.store.append_logs(job_id, chunk.lines)?;
        }

        let lines = self.store.get(job_id)?.logs();
        let total = i64::try_from(lines.len()).unwrap_or(i64::MAX);
        let (first, count) = log_window(total, first_line, num_lines, latest);

        let selected = if first >= total || count <= 0 {
            Vec::new()
        } else {
            let start = first as usize;
            let end = first.saturating_add(count).min(total) as usize;
            lines[start..end].to_vec()
        };

        Ok(LogSlice {
            job_id: job_id.clone(),
            first: first as u64,
            max_lines: total as u64,
            latest,
            lines: selected,
        })
    }
}

/// Resolves `(first, count)` against `total` available lines. `first` is never negative.
pub(crate) fn log_window(
    total: i64,
    first_line: Option<i64>,
    num_lines: Option<i64>,
    latest: bool,
) -> (i64, i64) {
    if latest {
        let count = num_lines.unwrap_or(total).clamp(0, total);
        return (total - count, count);
    }
    let first = first_line.unwrap_or(0).max(0);
    let count = num_lines.unwrap_or(total - first).max(0);
    (first, count)
}
