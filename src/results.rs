//! # Result Merging and Reporting
//!
//! Turns the payloads a run collected into one fleet-wide summary.
//!
//! 1. [`MergeEngine::normalize`] parses each payload into a
//!    [`SummaryRecord`]. A payload with an unparseable field drops its
//!    target from the merge; the others are unaffected.
//! 2. [`MergeEngine::reduce`] folds the records, starting from the neutral
//!    record, with [`SummaryRecord::merge`]. The fold is associative and
//!    commutative up to floating point rounding, so payload order does not
//!    matter.
//! 3. [`FleetReport`] pairs the aggregate with run metadata, the list of
//!    excluded targets and the hosts whose cleanup failed. Its `Display` form is the text report printed on
//!    stdout; [`ResultsManager`] writes it as JSON.

use crate::coordination::{
    CleanupFailure, CollectedPayload, FailureStage, RunOutcome, TargetFailure,
};
use crate::error::TargetError;
use crate::metrics::{StatBlock, SummaryRecord};
use crate::target::HostId;
use crate::utils::{format_bytes_f64, format_metric, format_percent, format_rate, format_seconds};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// The normalized result of one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    pub target: usize,
    pub host: HostId,
    pub record: SummaryRecord,
}

/// Normalization and reduction of per-target results.
pub struct MergeEngine;

impl MergeEngine {
    /// Parse every collected payload into a [`SummaryRecord`].
    ///
    /// ## Parameters
    /// - `payloads`: Decoded result documents, one per target that finished
    ///   COLLECT
    ///
    /// ## Returns
    /// The usable records, and one [`FailureStage::Normalize`] failure for
    /// each payload with a field that could not be parsed. A bad payload
    /// never affects the others.
    pub fn normalize(payloads: &[CollectedPayload]) -> (Vec<HostRecord>, Vec<TargetFailure>) {
        let mut records = Vec::with_capacity(payloads.len());
        let mut failures = Vec::new();

        for payload in payloads {
            match SummaryRecord::parse(&payload.raw) {
                Ok(record) => records.push(HostRecord {
                    target: payload.target,
                    host: payload.host.clone(),
                    record,
                }),
                Err(e) => {
                    let err = TargetError::from(e);
                    warn!(host = %payload.host, error = %err, "Discarding result");
                    let document = serde_json::to_string(&payload.raw).unwrap_or_default();
                    warn!(host = %payload.host, "result document:\n{}", document);
                    failures.push(TargetFailure {
                        target: payload.target,
                        host: payload.host.clone(),
                        stage: FailureStage::Normalize,
                        reason: err.to_string(),
                    });
                }
            }
        }

        (records, failures)
    }

    /// Fold records into one aggregate.
    ///
    /// Starts from [`SummaryRecord::empty`] and merges left to right. Since
    /// the merge is associative and commutative up to rounding, the order
    /// of `records` does not matter.
    ///
    /// ## Returns
    /// `None` when `records` is empty, so "no result" is never confused
    /// with a run that measured zero requests.
    pub fn reduce<I>(records: I) -> Option<SummaryRecord>
    where
        I: IntoIterator<Item = SummaryRecord>,
    {
        let mut records = records.into_iter().peekable();
        records.peek()?;
        Some(records.fold(SummaryRecord::empty(), SummaryRecord::merge))
    }
}

/// Information about the machine that drove the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub cpu_cores: usize,
    pub tool_version: String,
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_cores: num_cpus::get(),
            tool_version: crate::VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub version: String,
    pub run_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub duration_secs: f64,
    pub interrupted: bool,
    pub args: Vec<String>,
    pub system_info: SystemInfo,
}

/// The fleet-wide outcome of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetReport {
    pub metadata: ReportMetadata,
    pub hosts_total: usize,
    pub hosts_succeeded: usize,
    pub aggregate: SummaryRecord,
    pub hosts: Vec<HostRecord>,
    /// Targets left out of the aggregate.
    pub failures: Vec<TargetFailure>,
    /// Hosts that may still hold the binary or result files.
    #[serde(default)]
    pub cleanup_failures: Vec<CleanupFailure>,
}

impl FleetReport {
    /// Build the report for a finished run.
    ///
    /// ## Parameters
    /// - `outcome`: What the orchestrator returned
    /// - `run_id`: Recorded in the report metadata
    /// - `excluded`: Targets that never reached the orchestrator
    ///   (preflight failures); they count toward `hosts_total`
    ///
    /// ## Returns
    /// `None` when not a single target produced a usable result, after
    /// logging "0 of N hosts succeeded".
    pub fn from_outcome(
        outcome: &RunOutcome,
        run_id: &str,
        excluded: Vec<TargetFailure>,
    ) -> Option<FleetReport> {
        let hosts_total = outcome.targets.len() + excluded.len();
        let (hosts, parse_failures) = MergeEngine::normalize(&outcome.payloads);

        let mut failures = excluded;
        failures.extend(outcome.failures.iter().cloned());
        failures.extend(parse_failures);
        failures.sort_by_key(|f| f.target);

        let aggregate = match MergeEngine::reduce(hosts.iter().map(|h| h.record.clone())) {
            Some(aggregate) => aggregate,
            None => {
                warn!("0 of {} hosts succeeded; no report produced", hosts_total);
                return None;
            }
        };
        debug!("Merged {} of {} result(s)", hosts.len(), hosts_total);

        let args = outcome
            .targets
            .first()
            .map(|t| t.args().to_vec())
            .unwrap_or_default();

        Some(FleetReport {
            metadata: ReportMetadata {
                version: crate::VERSION.to_string(),
                run_id: run_id.to_string(),
                timestamp: chrono::Utc::now(),
                duration_secs: outcome.elapsed.as_secs_f64(),
                interrupted: outcome.interrupted,
                args,
                system_info: SystemInfo::default(),
            },
            hosts_total,
            hosts_succeeded: hosts.len(),
            aggregate,
            hosts,
            failures,
            cleanup_failures: outcome.cleanup_failures.clone(),
        })
    }
}

fn write_block(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    block: &StatBlock,
    render: fn(f64) -> String,
) -> fmt::Result {
    writeln!(f, "{}:", name)?;
    writeln!(f, "    mean: {}", render(block.mean))?;
    writeln!(f, "    stdev: {}", render(block.stdev))?;
    writeln!(f, "    max: {}", render(block.max))?;
    writeln!(f, "    +/- stdev: {}", format_percent(block.within_stdev))
}

impl fmt::Display for FleetReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.aggregate;
        writeln!(f, "threads: {}", r.threads)?;
        writeln!(f, "connections: {}", r.connections)?;
        writeln!(f, "time_set: {}", format_seconds(r.time_set))?;
        writeln!(f, "time_run: {}", format_seconds(r.time_run))?;
        writeln!(f, "requests: {}", r.requests)?;
        writeln!(f, "rps: {}", format_metric(r.rps))?;
        writeln!(f, "read: {}", format_bytes_f64(r.read))?;
        writeln!(f, "bandwidth: {}", format_rate(r.bandwidth))?;
        write_block(f, "thread_stat_latency", &r.latency, format_seconds)?;
        write_block(f, "thread_stat_rps", &r.rps_stat, format_metric)?;
        write!(
            f,
            "hosts: {} of {} succeeded",
            self.hosts_succeeded, self.hosts_total
        )?;
        if self.metadata.interrupted {
            write!(f, " (interrupted)")?;
        }
        for failure in &self.failures {
            write!(
                f,
                "\n    excluded {}#{} at {}: {}",
                failure.host, failure.target, failure.stage, failure.reason
            )?;
        }
        for failure in &self.cleanup_failures {
            write!(f, "\n    cleanup failed on {}: {}", failure.host, failure.reason)?;
        }
        Ok(())
    }
}

/// Writes reports to the optional JSON output file.
pub struct ResultsManager {
    output_file: Option<PathBuf>,
}

impl ResultsManager {
    pub fn new(output_file: Option<&Path>) -> Self {
        Self {
            output_file: output_file.map(Path::to_path_buf),
        }
    }

    /// Write `report` as pretty JSON if an output file was configured.
    pub fn finalize(&self, report: &FleetReport) -> Result<()> {
        let Some(path) = &self.output_file else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(report).context("serializing report")?;
        std::fs::write(path, json)
            .with_context(|| format!("writing report to {}", path.display()))?;
        info!("Results written to: {:?}", path);
        Ok(())
    }
}
