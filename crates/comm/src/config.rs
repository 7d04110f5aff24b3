#![forbid(unsafe_code)]

use clap::Parser;
use jobtrack_core::JobId;
use jobtrack_storage::BatchTerminalPolicy;
use std::collections::BTreeSet;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "jobtrack")]
#[command(version)]
#[command(
    about = "Tracks backend jobs for a front end over a stdio job channel",
    long_about = None
)]
pub struct Config {
    /// Backend bridge executable, spoken to over JSON-RPC on its stdin/stdout
    ///
    /// Can also be set via JOBTRACK_BACKEND_CMD environment variable
    #[arg(long, env = "JOBTRACK_BACKEND_CMD", required = true)]
    pub backend_cmd: String,

    /// Argument passed to the backend bridge (repeatable)
    #[arg(long = "backend-arg", allow_hyphen_values = true)]
    pub backend_args: Vec<String>,

    /// Status loop interval in milliseconds (default: 10000)
    ///
    /// Can also be set via JOBTRACK_POLL_INTERVAL_MS environment variable
    #[arg(
        long,
        env = "JOBTRACK_POLL_INTERVAL_MS",
        default_value_t = 10_000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub poll_interval_ms: u64,

    /// When a batch parent counts as finished: all-completed or all-settled
    ///
    /// Can also be set via JOBTRACK_BATCH_POLICY environment variable
    #[arg(
        long,
        env = "JOBTRACK_BATCH_POLICY",
        default_value = "all-completed",
        value_parser = parse_batch_policy
    )]
    pub batch_policy: BatchTerminalPolicy,

    /// Job ids to load at startup (comma-separated or repeated)
    ///
    /// Can also be set via JOBTRACK_JOB_IDS environment variable
    #[arg(long = "job-id", env = "JOBTRACK_JOB_IDS", value_delimiter = ',')]
    pub job_ids: Vec<String>,

    /// Only load jobs started from these cells (comma-separated or repeated)
    ///
    /// Can also be set via JOBTRACK_CELL_IDS environment variable
    #[arg(long = "cell-id", env = "JOBTRACK_CELL_IDS", value_delimiter = ',')]
    pub cell_ids: Vec<String>,
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Startup job ids, deduplicated in order; blank entries are skipped.
    pub fn known_job_ids(&self) -> Vec<JobId> {
        JobId::dedupe_valid(self.job_ids.iter().map(|raw| Some(raw.as_str())))
    }

    /// `None` when no cell filter was given.
    pub fn cell_filter(&self) -> Option<BTreeSet<String>> {
        let cells = self
            .cell_ids
            .iter()
            .map(|cell| cell.trim())
            .filter(|cell| !cell.is_empty())
            .map(str::to_string)
            .collect::<BTreeSet<_>>();
        (!cells.is_empty()).then_some(cells)
    }
}

fn parse_batch_policy(value: &str) -> Result<BatchTerminalPolicy, String> {
    BatchTerminalPolicy::parse(value)
        .ok_or_else(|| {
            format!("unknown batch policy '{value}' (expected all-completed or all-settled)")
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config, clap::Error> {
        Config::try_parse_from(std::iter::once("jobtrack").chain(args.iter().copied()))
    }

    #[test]
    fn defaults() {
        let config = parse(&["--backend-cmd", "bridge"]).expect("parse");
        assert_eq!(config.backend_cmd, "bridge");
        assert!(config.backend_args.is_empty());
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.batch_policy, BatchTerminalPolicy::AllCompleted);
        assert!(config.known_job_ids().is_empty());
        assert_eq!(config.cell_filter(), None);
    }

    #[test]
    fn lists_and_policy() {
        let config = parse(&[
            "--backend-cmd",
            "bridge",
            "--backend-arg",
            "--fixture",
            "--backend-arg",
            "jobs.json",
            "--job-id",
            "a,b, ,a",
            "--job-id",
            "c",
            "--cell-id",
            "cell-1,cell-2",
            "--batch-policy",
            "all_settled",
            "--poll-interval-ms",
            "250",
        ])
        .expect("parse");

        assert_eq!(config.backend_args, vec!["--fixture", "jobs.json"]);
        let ids = config
            .known_job_ids()
            .into_iter()
            .map(JobId::into_string)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["a", "b", "c"]);
        let cells = config.cell_filter().expect("cells");
        assert!(cells.contains("cell-1") && cells.contains("cell-2"));
        assert_eq!(config.batch_policy, BatchTerminalPolicy::AllSettled);
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["--backend-cmd", "bridge", "--batch-policy", "sometimes"]).is_err());
        assert!(parse(&["--backend-cmd", "bridge", "--poll-interval-ms", "0"]).is_err());
    }
}
