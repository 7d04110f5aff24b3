#![forbid(unsafe_code)]

use super::{JobStore, StoreError};
use jobtrack_core::model::JOB_INIT_EXCLUDED_JOB_STATE_FIELDS;
use jobtrack_core::{Backend, JobId, JobRecord, JobState};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Outcome of a session bulk load.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InitReport {
    pub loaded: Vec<JobId>,
    /// Ids that could not be resolved or failed record construction.
    ///
    /// Children are never fetched on a parent's behalf, so a batch parent whose children are not
    /// all among the known ids lands here.
    pub dropped: Vec<JobId>,
}

impl JobStore {
    /// Loads every known job with a single bulk backend lookup.
    ///
    /// With `cell_ids`, only jobs run from one of those cells are kept; a batch parent is kept
    /// when any of its children matches. Jobs already in the store are left alone. A batch parent
    /// loads only if every child is among `known_ids`.
    pub fn initialize_from_backend<B: Backend>(
        &mut self,
        backend: &mut B,
        known_ids: &[JobId],
        cell_ids: Option<&BTreeSet<String>>,
        now_ms: i64,
    ) -> Result<InitReport, StoreError> {
        let mut report = InitReport::default();
        let mut seen = BTreeSet::new();
        let wanted = known_ids
            .iter()
            .filter(|job_id| seen.insert((*job_id).clone()) && !self.contains(job_id))
            .cloned()
            .collect::<Vec<_>>();
        if wanted.is_empty() {
            return Ok(report);
        }

        let mut states = backend
            .check_jobs(&wanted, JOB_INIT_EXCLUDED_JOB_STATE_FIELDS)
            .map_err(StoreError::LookupFailed)?;
        debug!(requested = wanted.len(), resolved = states.len(), "bulk job load");

        for job_id in &wanted {
            if !states.contains_key(job_id) {
                warn!(job_id = %job_id, "job could not be resolved by the backend; dropping");
                report.dropped.push(job_id.clone());
            }
        }

        if let Some(cells) = cell_ids {
            retain_cells(&mut states, cells);
        }

        let (parents, singles): (Vec<_>, Vec<_>) = states
            .into_iter()
            .partition(|(_, state)| state.is_batch_job());
        let single_states = singles.into_iter().collect::<BTreeMap<_, _>>();

        for (job_id, state) in &single_states {
            match self.load_one(state.clone(), None, now_ms) {
                Ok(()) => report.loaded.push(job_id.clone()),
                Err(err) => {
                    warn!(job_id = %job_id, error = %err, "job dropped during load");
                    report.dropped.push(job_id.clone());
                }
            }
        }

        for (job_id, state) in parents {
            let children = state
                .child_jobs
                .iter()
                .flatten()
                .filter(|child| self.contains(child))
                .cloned()
                .collect::<Vec<_>>();
            match self.load_one(state, Some(children), now_ms) {
                Ok(()) => report.loaded.push(job_id),
                Err(err) => {
                    warn!(job_id = %job_id, error = %err, "batch job dropped during load");
                    report.dropped.push(job_id);
                }
            }
        }

        info!(
            loaded = report.loaded.len(),
            dropped = report.dropped.len(),
            "session jobs initialized"
        );
        Ok(report)
    }

    fn load_one(
        &mut self,
        state: JobState,
        children: Option<Vec<JobId>>,
        now_ms: i64,
    ) -> Result<(), StoreError> {
        let mut record = JobRecord::new(state, children)?;
        record.mark_refreshed(now_ms);
        let refresh_count = if self.is_terminal(&record) { 0 } else { 1 };
        self.register(record.with_refresh_count(refresh_count))
    }
}

fn retain_cells(states: &mut BTreeMap<JobId, JobState>, cells: &BTreeSet<String>) {
    let in_cell = |state: &JobState| {
        state
            .cell_info()
            .and_then(|info| info.cell_id.as_ref())
            .is_some_and(|cell| cells.contains(cell))
    };

    let mut keep = BTreeSet::new();
    for (job_id, state) in states.iter() {
        if state.is_batch_job() {
            let child_match = state
                .child_jobs
                .iter()
                .flatten()
                .any(|child| states.get(child).is_some_and(in_cell));
            if child_match || in_cell(state) {
                keep.insert(job_id.clone());
                keep.extend(state.child_jobs.iter().flatten().cloned());
            }
        } else if in_cell(state) {
            keep.insert(job_id.clone());
        }
    }

    states.retain(|job_id, _| {
        let kept = keep.contains(job_id);
        if !kept {
            debug!(job_id = %job_id, "job skipped: not associated with a known cell");
        }
        kept
    });
}
