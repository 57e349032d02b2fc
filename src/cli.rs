use crate::coordination::PhaseTimeouts;
use crate::units::Dimension;
use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

const EXAMPLES: &str = "\
Examples:
    dwrk build
    dwrk run -t2 -c10 -d10s http://127.0.0.1
    dwrk -b /tmp/wrk -h /tmp/host run -t2 -c10 -d10s http://127.0.0.1";

/// Distributed wrk - run one HTTP benchmark on many hosts and merge the results
#[derive(Parser, Debug)]
#[clap(
    version,
    about,
    long_about = None,
    disable_help_flag = true,
    disable_help_subcommand = true,
    after_help = EXAMPLES
)]
pub struct Args {
    /// Local wrk binary deployed to every host
    #[clap(short = 'b', long = "binary", global = true, default_value = crate::defaults::LOCAL_BINARY)]
    pub binary: PathBuf,

    /// Host file, one host per line
    #[clap(short = 'h', long = "hosts", global = true, default_value = crate::defaults::HOST_FILE)]
    pub hosts: PathBuf,

    /// Where the binary is placed on each host
    #[clap(long, global = true, default_value = crate::defaults::REMOTE_BINARY)]
    pub remote_path: String,

    /// Remote directory for per-run result files
    #[clap(long, global = true, default_value = crate::defaults::SCRATCH_DIR)]
    pub scratch_dir: String,

    /// Extra ssh option, passed as `-o <OPTION>` (repeatable)
    #[clap(long = "ssh-option", global = true, value_name = "OPTION")]
    pub ssh_options: Vec<String>,

    /// Time limit for deploy, collect and cleanup commands
    #[clap(long, global = true, value_parser = parse_duration, default_value = crate::defaults::PHASE_TIMEOUT_STR)]
    pub phase_timeout: Duration,

    /// Time limit for the benchmark itself (default: none)
    #[clap(long, global = true, value_parser = parse_duration)]
    pub execute_timeout: Option<Duration>,

    /// Skip the host reachability check
    #[clap(long, global = true, default_value_t = false)]
    pub skip_verify: bool,

    /// Also write the report as JSON to this file
    #[clap(short = 'o', long = "output", global = true)]
    pub output_file: Option<PathBuf>,

    /// Verbose output
    #[clap(short = 'v', long, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Append logs to this file as well as stderr
    #[clap(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show this help message
    Help,

    /// Download and build the wrk binary
    Build {
        /// Directory to build in
        #[clap(default_value = crate::defaults::BUILD_DIR)]
        dir: PathBuf,
    },

    /// Run dwrk using wrk compatible options
    Run {
        /// wrk options and url, passed through unchanged
        #[clap(
            required = true,
            num_args = 1..,
            trailing_var_arg = true,
            allow_hyphen_values = true,
            value_name = "WRK_OPTIONS"
        )]
        wrk_args: Vec<String>,
    },
}

/// Configuration for one distributed run
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub local_binary: PathBuf,
    pub host_file: PathBuf,
    pub remote_binary: String,
    pub scratch_dir: String,
    pub ssh_options: Vec<String>,
    pub timeouts: PhaseTimeouts,
    pub verify_hosts: bool,
    pub output_file: Option<PathBuf>,
    pub wrk_args: Vec<String>,
}

impl RunConfig {
    pub fn new(args: &Args, wrk_args: &[String]) -> Self {
        let limit = Some(args.phase_timeout);
        Self {
            local_binary: args.binary.clone(),
            host_file: args.hosts.clone(),
            remote_binary: args.remote_path.clone(),
            scratch_dir: args.scratch_dir.clone(),
            ssh_options: args.ssh_options.clone(),
            timeouts: PhaseTimeouts {
                deploy: limit,
                execute: args.execute_timeout,
                collect: limit,
                cleanup: limit,
            },
            verify_hosts: !args.skip_verify,
            output_file: args.output_file.clone(),
            wrk_args: wrk_args.to_vec(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.remote_binary.starts_with('/') {
            bail!("--remote-path must be absolute, got {:?}", self.remote_binary);
        }
        if !self.scratch_dir.starts_with('/') {
            bail!("--scratch-dir must be absolute, got {:?}", self.scratch_dir);
        }
        if self.wrk_args.is_empty() {
            bail!("No wrk options given");
        }
        if let Some(arg) = self
            .wrk_args
            .iter()
            .find(|a| *a == "--json" || a.starts_with("--json="))
        {
            bail!("{:?} is set by dwrk itself and cannot be passed through", arg);
        }
        for phase in crate::coordination::Phase::ALL {
            if self.timeouts.get(phase) == Some(Duration::ZERO) {
                bail!("{} timeout must be greater than zero", phase);
            }
        }
        Ok(())
    }
}

/// Parse duration from string (e.g., "500ms", "10s", "5m", "1h")
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let seconds = Dimension::Time.parse(s).map_err(|e| e.to_string())?;
    Duration::try_from_secs_f64(seconds).map_err(|e| format!("Invalid duration {s:?}: {e}"))
}
