//! # dwrk - Main Entry Point
//!
//! 1. **Parse arguments** and install logging (stderr, optional log file)
//! 2. **Dispatch** `help`, `build` or `run`
//! 3. For `run`: check local inputs, load hosts, probe them, drive the
//!    fleet through the lifecycle, print the merged report on stdout and
//!    optionally write it as JSON
//!
//! ## Exit codes
//!
//! - `0`: success, and also a failed `build` (the failure is logged)
//! - `1`: missing binary or host file, empty host list, no reachable host,
//!   no usable result, or any other error
//! - `130`: interrupted with Ctrl+C (cleanup has run, partial report shown)

use anyhow::Result;
use clap::{CommandFactory, Parser};
use dwrk::{
    build::build_binary,
    cli::{Args, Command, RunConfig},
    coordination::{verify_hosts, Orchestrator},
    error::RunError,
    hosts::read_hosts,
    logging,
    results::{FleetReport, ResultsManager},
    target::{CommandPlanner, RemoteTarget},
    transport::{RemoteShell, SshTransport},
    utils::generate_run_id,
};
use std::collections::HashSet;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let _log_guard = match logging::init(args.verbose, args.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    debug!("Configuration: {:?}", args);

    match dispatch(&args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(args: &Args) -> Result<ExitCode> {
    match &args.command {
        None | Some(Command::Help) => {
            Args::command().print_help()?;
            Ok(ExitCode::SUCCESS)
        }
        Some(Command::Build { dir }) => {
            match build_binary(dir, &args.binary).await {
                Ok(path) => info!("Binary ready: {}", path.display()),
                Err(e) => error!("Failed to build binary: {:#}", e),
            }
            Ok(ExitCode::SUCCESS)
        }
        Some(Command::Run { wrk_args }) => run(RunConfig::new(args, wrk_args)).await,
    }
}

async fn run(config: RunConfig) -> Result<ExitCode> {
    config.validate()?;

    if !config.local_binary.exists() {
        error!(
            "No wrk binary found at {}. Use 'dwrk build' to create one, or specify it with '-b'",
            config.local_binary.display()
        );
        info!("See more help info using 'dwrk help'");
        return Ok(ExitCode::FAILURE);
    }
    if !config.host_file.exists() {
        error!(
            "No host file found at {}. Specify it with '-h'",
            config.host_file.display()
        );
        info!("See more help info using 'dwrk help'");
        return Ok(ExitCode::FAILURE);
    }

    let hosts = read_hosts(&config.host_file)?;
    if hosts.is_empty() {
        error!("No host specified in {}", config.host_file.display());
        return Ok(ExitCode::FAILURE);
    }

    let run_id = generate_run_id();
    info!("Run {}: {} target(s)", run_id, hosts.len());

    let shell: Arc<dyn RemoteShell> =
        Arc::new(SshTransport::new().with_options(&config.ssh_options));
    let mut targets = RemoteTarget::fleet(&hosts, &run_id, &config.scratch_dir, &config.wrk_args);
    let mut excluded = Vec::new();

    if config.verify_hosts {
        let distinct = hosts.iter().collect::<HashSet<_>>().len();
        info!("Verifying {} host(s)...", distinct);
        let check = verify_hosts(Arc::clone(&shell), &hosts, config.timeouts.deploy).await;
        let (kept, failed) = check.partition(targets);
        if kept.is_empty() {
            return Err(RunError::NoReachableHosts(distinct).into());
        }
        targets = kept;
        excluded = failed;
    }

    let planner = CommandPlanner::new(config.local_binary.clone(), config.remote_binary.clone());
    let orchestrator = Orchestrator::new(shell, planner, targets).with_timeouts(config.timeouts);

    let outcome = match orchestrator.run_with_signal_handling().await {
        Ok(outcome) => outcome,
        Err(RunError::Interrupted) => {
            warn!("{}", RunError::Interrupted);
            return Ok(ExitCode::from(EXIT_INTERRUPTED));
        }
        Err(e) => return Err(e.into()),
    };

    let report = FleetReport::from_outcome(&outcome, &run_id, excluded);
    if let Some(report) = &report {
        println!("{report}");
        ResultsManager::new(config.output_file.as_deref()).finalize(report)?;
    }

    if outcome.interrupted {
        warn!("{}", RunError::Interrupted);
        return Ok(ExitCode::from(EXIT_INTERRUPTED));
    }
    Ok(match report {
        Some(_) => ExitCode::SUCCESS,
        None => ExitCode::FAILURE,
    })
}
