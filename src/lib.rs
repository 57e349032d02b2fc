//! # dwrk - Distributed wrk
//!
//! Runs one wrk HTTP benchmark simultaneously on a fleet of hosts over ssh
//! and folds the per-host results into a single statistically consistent
//! summary, as if one very large client had produced it.
//!
//! ## Lifecycle
//!
//! Every run moves all targets through four phases, separated by barriers:
//!
//! 1. **DEPLOY**: copy the local wrk binary to every host
//! 2. **EXECUTE**: start the benchmark on every target at once
//! 3. **COLLECT**: read each target's JSON result file
//! 4. **CLEANUP**: remove the binary and result files, always attempted once
//!    DEPLOY has been attempted
//!
//! A target that fails is reported and left out; the rest of the fleet
//! carries on.
//!
//! ## Merging
//!
//! Counters (threads, connections, requests, rps, bytes) add up. Durations
//! are averaged per host. Latency and per-thread rps statistics are pooled:
//! means weighted by request count, standard deviations combined from the
//! per-host second moments, maxima by maximum.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dwrk::{CommandPlanner, HostId, Orchestrator, RemoteTarget, SshTransport};
//! use dwrk::results::FleetReport;
//! use std::sync::Arc;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let hosts = vec![HostId::from("bench-1"), HostId::from("bench-2")];
//! let run_id = dwrk::utils::generate_run_id();
//! let args = vec!["-t2".to_string(), "-c10".to_string(), "http://10.0.0.1".to_string()];
//! let targets = RemoteTarget::fleet(&hosts, &run_id, "/tmp", &args);
//!
//! let orchestrator = Orchestrator::new(
//!     Arc::new(SshTransport::new()),
//!     CommandPlanner::new("./wrk", "/tmp/wrk"),
//!     targets,
//! );
//! let outcome = orchestrator.run().await?;
//! if let Some(report) = FleetReport::from_outcome(&outcome, &run_id, Vec::new()) {
//!     println!("{report}");
//! }
//! # Ok(())
//! # }
//! ```

/// `dwrk build`: download and compile wrk
pub mod build;

/// Command-line interface and run configuration
///
/// clap-derived arguments, the `help`/`build`/`run` subcommands and the
/// conversion into a validated [`cli::RunConfig`].
pub mod cli;

/// Phase state machine, barrier orchestration and host preflight
pub mod coordination;

pub mod error;

/// Host file parsing
pub mod hosts;

pub mod logging;

/// Result documents and the merge algebra
///
/// Raw wrk JSON payloads, their normalized [`metrics::SummaryRecord`] form,
/// and the associative merge that combines two records.
pub mod metrics;

/// Fleet report assembly, text rendering and JSON output
pub mod results;

/// Remote targets and per-phase command planning
pub mod target;

/// Remote command execution (`ssh`/`scp`) and its test double
pub mod transport;

/// Magnitude strings (`"1.5ms"`, `"2KB"`, `"3.4k"`, `"68%"`)
pub mod units;

pub mod utils;

pub use coordination::{Orchestrator, Phase, RunOutcome};
pub use error::{FormatError, RunError, TargetError};
pub use metrics::{RawSummary, StatBlock, SummaryRecord};
pub use results::{FleetReport, MergeEngine, ResultsManager};
pub use target::{CommandPlanner, HostId, RemoteTarget};
pub use transport::{RemoteShell, SshTransport};

/// The current version of dwrk, recorded in JSON reports.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Local wrk binary, relative to the working directory
    pub const LOCAL_BINARY: &str = "wrk";

    /// Host file, relative to the working directory
    pub const HOST_FILE: &str = "host";

    /// Where the binary is copied on every host
    pub const REMOTE_BINARY: &str = "/tmp/wrk";

    /// Remote directory for result files
    pub const SCRATCH_DIR: &str = "/tmp";

    /// Result files are named `<prefix>.<run id>.<target index>`
    pub const STAT_FILE_PREFIX: &str = "stat.wrk";

    /// Limit for the deploy, collect and cleanup phases
    ///
    /// The benchmark phase itself is unbounded unless `--execute-timeout`
    /// is given, since its length is whatever `-d` says.
    pub const PHASE_TIMEOUT: Duration = Duration::from_secs(60);
    pub const PHASE_TIMEOUT_STR: &str = "60s";

    pub const BUILD_DIR: &str = "/tmp";
    pub const WRK_ARCHIVE_URL: &str = "https://github.com/innomentats/wrk/archive/master.tar.gz";
    pub const WRK_ARCHIVE_NAME: &str = "master.tar.gz";
    pub const WRK_SOURCE_DIR: &str = "wrk-master";
}
