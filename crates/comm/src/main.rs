#![forbid(unsafe_code)]

use clap::Parser;
use jobtrack_comm::entry::run_stdio;
use jobtrack_comm::protocol::LineSink;
use jobtrack_comm::{Config, JobComm, JobManager, RpcBackend, logging};
use jobtrack_storage::JobStore;
use std::time::Instant;
use tracing::{info, warn};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();
    let config = Config::parse();

    let backend = RpcBackend::spawn(&config.backend_cmd, &config.backend_args)?;
    let mut manager = JobManager::new(backend, JobStore::new(config.batch_policy));

    let known = config.known_job_ids();
    let cells = config.cell_filter();
    let report = manager.initialize_jobs(&known, cells.as_ref())?;
    if !report.dropped.is_empty() {
        warn!(dropped = report.dropped.len(), "some known jobs could not be loaded");
    }
    info!(
        loaded = report.loaded.len(),
        policy = config.batch_policy.as_str(),
        interval_ms = config.poll_interval_ms,
        "job session initialized"
    );

    let has_listeners = manager.has_listeners();
    let mut comm = JobComm::new(
        manager,
        LineSink::new(std::io::stdout()),
        config.poll_interval(),
    );
    if has_listeners {
        comm.start_status_loop(Instant::now());
    }

    run_stdio(&mut comm)
}
