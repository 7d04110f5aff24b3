#![forbid(unsafe_code)]

use jobtrack_core::testing::{
    BackendCall, MockBackend, batch_child_state, batch_parent_state, id, job_state,
};
use jobtrack_core::{JobId, JobStatus};
use jobtrack_storage::{JobStore, StoreError};
use std::collections::BTreeSet;

fn ids(raw: &[&str]) -> Vec<JobId> {
    raw.iter().map(|r| id(r)).collect()
}

#[test]
fn bulk_load_uses_one_backend_call_and_partitions_by_terminality() {
    let mut backend = MockBackend::with_jobs([
        job_state("a", JobStatus::Running),
        job_state("b", JobStatus::Completed),
        job_state("c", JobStatus::Queued),
    ]);
    let mut store = JobStore::default();

    let report = store
        .initialize_from_backend(&mut backend, &ids(&["a", "b", "c", "a"]), None, 100)
        .expect("init");

    assert_eq!(backend.calls.len(), 1);
    assert!(matches!(&backend.calls[0], BackendCall::CheckJobs(sent) if sent.len() == 3));
    assert_eq!(report.loaded.len(), 3);
    assert!(report.dropped.is_empty());

    assert_eq!(store.active_ids(), ids(&["a", "c"]));
    assert_eq!(store.completed_ids(), ids(&["b"]));
    assert_eq!(store.get(&id("a")).unwrap().refresh_count(), 1);
    assert_eq!(store.get(&id("b")).unwrap().refresh_count(), 0);
    assert_eq!(store.get(&id("a")).unwrap().last_refresh_ms(), Some(100));
    // initial loads keep provenance
    assert_eq!(store.get(&id("a")).unwrap().app_id(), Some("Module/app"));
}

#[test]
fn unresolvable_ids_are_dropped_and_reported() {
    let mut backend = MockBackend::with_jobs([job_state("a", JobStatus::Running)]);
    let mut store = JobStore::default();

    let report = store
        .initialize_from_backend(&mut backend, &ids(&["a", "ghost"]), None, 0)
        .expect("init");

    assert_eq!(report.loaded, ids(&["a"]));
    assert_eq!(report.dropped, ids(&["ghost"]));
    assert!(!store.contains(&id("ghost")));
}

#[test]
fn backend_outage_is_fatal() {
    let mut backend = MockBackend::with_jobs([job_state("a", JobStatus::Running)]);
    backend.fail_all = true;
    let mut store = JobStore::default();

    let err = store
        .initialize_from_backend(&mut backend, &ids(&["a"]), None, 0)
        .unwrap_err();
    assert!(matches!(err, StoreError::LookupFailed(_)));
    assert!(store.is_empty());
}

#[test]
fn batch_parent_with_missing_child_is_dropped() {
    let mut backend = MockBackend::with_jobs([
        batch_parent_state("batch", JobStatus::Running, &["c1", "c2"]),
        batch_child_state("c1", "batch", JobStatus::Running),
    ]);
    let mut store = JobStore::default();

    let report = store
        .initialize_from_backend(&mut backend, &ids(&["batch", "c1"]), None, 0)
        .expect("init");

    assert_eq!(report.loaded, ids(&["c1"]));
    assert_eq!(report.dropped, ids(&["batch"]));
}

#[test]
fn batch_parent_without_known_children_is_dropped_without_extra_lookups() {
    let mut backend = MockBackend::with_jobs([
        batch_parent_state("batch", JobStatus::Running, &["c1", "c2"]),
        batch_child_state("c1", "batch", JobStatus::Running),
        batch_child_state("c2", "batch", JobStatus::Running),
    ]);
    let mut store = JobStore::default();

    let report = store
        .initialize_from_backend(&mut backend, &ids(&["batch"]), None, 0)
        .expect("init");

    assert!(report.loaded.is_empty());
    assert_eq!(report.dropped, ids(&["batch"]));
    assert_eq!(backend.calls.len(), 1);
    assert!(!store.contains(&id("c1")));
}

#[test]
fn batch_parent_loads_after_its_children() {
    let mut backend = MockBackend::with_jobs([
        batch_parent_state("batch", JobStatus::Completed, &["c1", "c2"]),
        batch_child_state("c1", "batch", JobStatus::Completed),
        batch_child_state("c2", "batch", JobStatus::Completed),
    ]);
    let mut store = JobStore::default();

    store
        .initialize_from_backend(&mut backend, &ids(&["c2", "batch", "c1"]), None, 0)
        .expect("init");

    let parent = store.get(&id("batch")).unwrap();
    assert_eq!(parent.children().len(), 2);
    assert!(store.is_completed(&id("batch")));
    assert_eq!(parent.refresh_count(), 0);
}

#[test]
fn cell_filter_keeps_matching_jobs_and_batches() {
    let mut other = job_state("elsewhere", JobStatus::Running);
    if let Some(info) = other
        .job_input
        .as_mut()
        .and_then(|input| input.narrative_cell_info.as_mut())
    {
        info.cell_id = Some("cell-9".to_string());
    }
    let mut backend = MockBackend::with_jobs([
        job_state("here", JobStatus::Running),
        other,
        batch_parent_state("batch", JobStatus::Running, &["c1"]),
        batch_child_state("c1", "batch", JobStatus::Running),
    ]);
    let mut store = JobStore::default();
    let cells = BTreeSet::from(["cell-1".to_string()]);

    let report = store
        .initialize_from_backend(
            &mut backend,
            &ids(&["here", "elsewhere", "batch", "c1"]),
            Some(&cells),
            0,
        )
        .expect("init");

    assert!(store.contains(&id("here")));
    assert!(store.contains(&id("batch")));
    assert!(store.contains(&id("c1")));
    assert!(!store.contains(&id("elsewhere")));
    assert!(report.dropped.is_empty());
}

#[test]
fn already_known_jobs_are_not_refetched() {
    let mut backend = MockBackend::with_jobs([job_state("a", JobStatus::Running)]);
    let mut store = JobStore::default();
    store
        .initialize_from_backend(&mut backend, &ids(&["a"]), None, 0)
        .expect("first init");
    backend.clear_calls();

    let report = store
        .initialize_from_backend(&mut backend, &ids(&["a"]), None, 0)
        .expect("second init");
    assert!(report.loaded.is_empty());
    assert!(backend.calls.is_empty());
}
