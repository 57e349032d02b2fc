//! # Fleet Coordination
//!
//! Drives every target through the same four phases, with a hard barrier
//! between them:
//!
//! ```text
//!   INIT ──► DEPLOY ──► EXECUTE ──► COLLECT ──► CLEANUP ──► DONE
//!              │           │           │           ▲
//!              └───────────┴───────────┴───────────┘
//!                  interrupt observed at a barrier
//! ```
//!
//! Within a phase one task is spawned per planned command, and the phase
//! ends only when every task has finished, failed or timed out. A target
//! that fails a phase is reported and skipped in the later phases of the
//! run, except CLEANUP, which is attempted for every host once DEPLOY has
//! been attempted.
//!
//! COLLECT workers decode their payload in place and append it to a shared
//! list guarded by a mutex.
//!
//! An operator interrupt never kills in-flight commands. The phase running
//! at the time finishes, then the run jumps straight to CLEANUP.

use crate::error::{RunError, TargetError};
use crate::metrics::RawSummary;
use crate::target::{CommandPlanner, HostId, PhaseCommand, PlannedCommand, RemoteTarget};
use crate::transport::{CommandOutput, RemoteInvocation, RemoteShell};
use crate::utils::{format_duration, tail_lines};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Lines of remote output shown when a target fails.
const DIAGNOSTIC_TAIL_LINES: usize = 20;

/// One lifecycle phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    Deploy,
    Execute,
    Collect,
    Cleanup,
}

impl Phase {
    pub const ALL: [Phase; 4] = [Phase::Deploy, Phase::Execute, Phase::Collect, Phase::Cleanup];
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Deploy => "DEPLOY",
            Phase::Execute => "EXECUTE",
            Phase::Collect => "COLLECT",
            Phase::Cleanup => "CLEANUP",
        };
        f.write_str(name)
    }
}

/// Position of a run in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Running(Phase),
    Done,
}

impl RunState {
    /// The state after the current one has finished. `interrupted` skips
    /// the remaining work phases and goes to CLEANUP (or DONE if nothing
    /// has been deployed yet).
    pub fn next(self, interrupted: bool) -> RunState {
        match self {
            RunState::Init if interrupted => RunState::Done,
            RunState::Init => RunState::Running(Phase::Deploy),
            RunState::Running(Phase::Cleanup) | RunState::Done => RunState::Done,
            RunState::Running(_) if interrupted => RunState::Running(Phase::Cleanup),
            RunState::Running(Phase::Deploy) => RunState::Running(Phase::Execute),
            RunState::Running(Phase::Execute) => RunState::Running(Phase::Collect),
            RunState::Running(Phase::Collect) => RunState::Running(Phase::Cleanup),
        }
    }

    pub fn phase(self) -> Option<Phase> {
        match self {
            RunState::Running(phase) => Some(phase),
            _ => None,
        }
    }
}

/// Per-phase wall-clock limits. `None` waits indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTimeouts {
    pub deploy: Option<Duration>,
    pub execute: Option<Duration>,
    pub collect: Option<Duration>,
    pub cleanup: Option<Duration>,
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        let limit = Some(crate::defaults::PHASE_TIMEOUT);
        Self {
            deploy: limit,
            execute: None,
            collect: limit,
            cleanup: limit,
        }
    }
}

impl PhaseTimeouts {
    pub fn get(&self, phase: Phase) -> Option<Duration> {
        match phase {
            Phase::Deploy => self.deploy,
            Phase::Execute => self.execute,
            Phase::Collect => self.collect,
            Phase::Cleanup => self.cleanup,
        }
    }
}

/// A decoded result document, tagged with where it came from.
#[derive(Debug, Clone)]
pub struct CollectedPayload {
    pub target: usize,
    pub host: HostId,
    pub raw: RawSummary,
}

/// Where a target dropped out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    /// The host did not answer the reachability probe.
    Preflight,
    Phase(Phase),
    /// The payload arrived but a field could not be normalized.
    Normalize,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureStage::Preflight => f.write_str("preflight"),
            FailureStage::Phase(phase) => write!(f, "{phase}"),
            FailureStage::Normalize => f.write_str("normalize"),
        }
    }
}

/// A target that dropped out of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFailure {
    pub target: usize,
    pub host: HostId,
    pub stage: FailureStage,
    pub reason: String,
}

/// A host whose CLEANUP did not succeed.
///
/// Its targets keep whatever they achieved earlier in the run; leftover
/// files on the host are the only consequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupFailure {
    pub host: HostId,
    pub reason: String,
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub targets: Vec<RemoteTarget>,
    pub payloads: Vec<CollectedPayload>,
    /// Targets dropped by DEPLOY, EXECUTE or COLLECT.
    pub failures: Vec<TargetFailure>,
    pub cleanup_failures: Vec<CleanupFailure>,
    pub completed: Vec<Phase>,
    pub interrupted: bool,
    pub elapsed: Duration,
}

/// Handle used to request a graceful stop from another task.
#[derive(Debug, Clone)]
pub struct InterruptHandle(Arc<watch::Sender<bool>>);

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.0.send_replace(true);
    }

    pub fn is_interrupted(&self) -> bool {
        *self.0.borrow()
    }
}

/// Result of a single planned command.
struct CommandRecord {
    planned: PlannedCommand,
    output: Option<CommandOutput>,
    error: Option<TargetError>,
}

type PayloadSink = Arc<Mutex<Vec<CollectedPayload>>>;

/// Runs one benchmark across a fleet.
pub struct Orchestrator {
    shell: Arc<dyn RemoteShell>,
    planner: CommandPlanner,
    targets: Vec<RemoteTarget>,
    timeouts: PhaseTimeouts,
    interrupt: InterruptHandle,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("planner", &self.planner)
            .field("targets", &self.targets.len())
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(
        shell: Arc<dyn RemoteShell>,
        planner: CommandPlanner,
        targets: Vec<RemoteTarget>,
    ) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            shell,
            planner,
            targets,
            timeouts: PhaseTimeouts::default(),
            interrupt: InterruptHandle(Arc::new(tx)),
        }
    }

    pub fn with_timeouts(mut self, timeouts: PhaseTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn targets(&self) -> &[RemoteTarget] {
        &self.targets
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Run with Ctrl+C turned into a graceful interrupt.
    pub async fn run_with_signal_handling(&self) -> Result<RunOutcome, RunError> {
        let handle = self.interrupt_handle();
        let signal_task = tokio::spawn(async move {
            loop {
                match tokio::signal::ctrl_c().await {
                    Ok(()) if handle.is_interrupted() => {
                        warn!("Already stopping; waiting for the current phase to finish");
                    }
                    Ok(()) => {
                        warn!("Interrupted: finishing the current phase, then cleaning up");
                        handle.interrupt();
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to listen for Ctrl+C");
                        break;
                    }
                }
            }
        });

        let result = self.run().await;
        signal_task.abort();
        result
    }

    /// Drive all targets through the lifecycle.
    ///
    /// Each phase spawns one task per planned command and waits for all of
    /// them before the next phase starts. A target that fails a phase is
    /// left out of the following ones; CLEANUP always covers every target.
    ///
    /// ## Returns
    /// - `Ok(RunOutcome)`: the decoded payloads, per-target failures and
    ///   cleanup failures, also after an interrupt (`interrupted` is set)
    /// - `Err(RunError::Interrupted)`: interrupted before DEPLOY started
    /// - `Err(RunError::Infrastructure)`: no process of DEPLOY, EXECUTE or
    ///   COLLECT could be started; CLEANUP has been attempted
    pub async fn run(&self) -> Result<RunOutcome, RunError> {
        let started = Instant::now();
        let sink: PayloadSink = Arc::new(Mutex::new(Vec::new()));
        let mut failures = Vec::new();
        let mut cleanup_failures = Vec::new();
        let mut completed = Vec::new();
        let mut dropped: HashSet<usize> = HashSet::new();
        let mut execute_output: HashMap<usize, CommandOutput> = HashMap::new();

        info!(
            "Starting run on {} target(s) across {} host(s)",
            self.targets.len(),
            self.targets.iter().collect::<HashSet<_>>().len()
        );

        let mut state = RunState::Init.next(self.interrupt.is_interrupted());
        if state == RunState::Done {
            return Err(RunError::Interrupted);
        }

        while let Some(phase) = state.phase() {
            let active: Vec<&RemoteTarget> = self
                .targets
                .iter()
                .filter(|t| phase == Phase::Cleanup || !dropped.contains(&t.index()))
                .collect();

            let records = self.run_phase(phase, &active, &sink).await;

            if let Some(source) = all_spawn_failures(&records) {
                let fatal = RunError::Infrastructure { phase, source };
                error!("{}", fatal);
                // Results collected so far are still reported.
                if phase != Phase::Cleanup {
                    let all: Vec<&RemoteTarget> = self.targets.iter().collect();
                    for record in self.run_phase(Phase::Cleanup, &all, &sink).await {
                        if let Some(err) = &record.error {
                            warn!(host = %record.planned.host, error = %err, "Cleanup failed");
                        }
                    }
                    return Err(fatal);
                }
            }

            for record in records {
                let CommandRecord {
                    planned,
                    output,
                    error,
                } = record;
                match error {
                    Some(err) => {
                        let diagnostics = planned
                            .targets
                            .iter()
                            .find_map(|t| execute_output.get(t))
                            .filter(|_| phase == Phase::Collect);
                        report_failure(phase, &planned, &err, output.as_ref(), diagnostics);
                        if phase == Phase::Cleanup {
                            cleanup_failures.push(CleanupFailure {
                                host: planned.host.clone(),
                                reason: err.to_string(),
                            });
                            continue;
                        }
                        for &target in &planned.targets {
                            dropped.insert(target);
                            failures.push(TargetFailure {
                                target,
                                host: planned.host.clone(),
                                stage: FailureStage::Phase(phase),
                                reason: err.to_string(),
                            });
                        }
                    }
                    None if phase == Phase::Execute => {
                        if let (Some(out), Some(&target)) = (output, planned.targets.first()) {
                            execute_output.insert(target, out);
                        }
                    }
                    None => {}
                }
            }

            completed.push(phase);
            state = state.next(self.interrupt.is_interrupted());
        }

        let mut payloads = std::mem::take(&mut *sink.lock());
        payloads.sort_by_key(|p| p.target);

        let elapsed = started.elapsed();
        info!(
            "Run finished in {}: {} of {} target(s) returned results",
            format_duration(elapsed),
            payloads.len(),
            self.targets.len()
        );

        Ok(RunOutcome {
            targets: self.targets.clone(),
            payloads,
            failures,
            cleanup_failures,
            completed,
            interrupted: self.interrupt.is_interrupted(),
            elapsed,
        })
    }

    /// Spawn every command of `phase`, then wait for all of them.
    async fn run_phase(
        &self,
        phase: Phase,
        targets: &[&RemoteTarget],
        sink: &PayloadSink,
    ) -> Vec<CommandRecord> {
        let plan = self.planner.plan(phase, targets);
        if plan.is_empty() {
            info!("{} phase: nothing to do", phase);
            return Vec::new();
        }

        let limit = self.timeouts.get(phase);
        let started = Instant::now();
        info!("{} phase: {} command(s)", phase, plan.len());

        let handles: Vec<_> = plan
            .into_iter()
            .map(|planned| {
                debug!(host = %planned.host, "{}: {}", phase, planned.command);
                let shell = Arc::clone(&self.shell);
                let sink = Arc::clone(sink);
                let task_planned = planned.clone();
                let handle = tokio::spawn(async move {
                    drive(shell.as_ref(), &task_planned, phase, limit, &sink).await
                });
                (planned, handle)
            })
            .collect();

        let mut records = Vec::with_capacity(handles.len());
        for (planned, handle) in handles {
            let (output, error) = match handle.await {
                Ok(result) => result,
                Err(e) => (None, Some(TargetError::Worker(e.to_string()))),
            };
            records.push(CommandRecord {
                planned,
                output,
                error,
            });
        }

        let ok = records.iter().filter(|r| r.error.is_none()).count();
        info!(
            "{} phase: {}/{} succeeded in {}",
            phase,
            ok,
            records.len(),
            format_duration(started.elapsed())
        );
        records
    }
}

/// Run one planned command to completion, including payload decoding for
/// COLLECT.
async fn drive(
    shell: &dyn RemoteShell,
    planned: &PlannedCommand,
    phase: Phase,
    limit: Option<Duration>,
    sink: &PayloadSink,
) -> (Option<CommandOutput>, Option<TargetError>) {
    let call = async {
        match &planned.command {
            PhaseCommand::Copy { local, remote } => {
                shell.copy_file(local, &planned.host, remote).await
            }
            PhaseCommand::Remote(invocation) => shell.run_remote(&planned.host, invocation).await,
        }
    };

    let result = match limit {
        Some(limit) => timeout(limit, call)
            .await
            .unwrap_or(Err(TargetError::TimedOut(limit))),
        None => call.await,
    };

    let output = match result {
        Ok(output) => output,
        Err(e) => return (None, Some(e)),
    };
    if !output.success {
        let status = output.status.clone();
        return (Some(output), Some(TargetError::Unreachable { status }));
    }
    if phase == Phase::Collect {
        if let Err(e) = decode_payload(planned, &output, sink) {
            return (Some(output), Some(e));
        }
    }
    (Some(output), None)
}

fn decode_payload(
    planned: &PlannedCommand,
    output: &CommandOutput,
    sink: &PayloadSink,
) -> Result<(), TargetError> {
    if output.stdout.iter().all(u8::is_ascii_whitespace) {
        return Err(TargetError::PayloadMissing);
    }
    let raw = RawSummary::from_slice(&output.stdout)?;
    let target = planned
        .targets
        .first()
        .copied()
        .ok_or_else(|| TargetError::Worker("collect command has no target".to_string()))?;
    sink.lock().push(CollectedPayload {
        target,
        host: planned.host.clone(),
        raw,
    });
    Ok(())
}

/// If every record failed to spawn, the first such error.
fn all_spawn_failures(records: &[CommandRecord]) -> Option<TargetError> {
    if records.is_empty()
        || !records
            .iter()
            .all(|r| r.error.as_ref().map_or(false, TargetError::is_spawn_failure))
    {
        return None;
    }
    records.iter().find_map(|r| match &r.error {
        Some(TargetError::Spawn { program, source }) => Some(TargetError::Spawn {
            program: program.clone(),
            source: std::io::Error::new(source.kind(), source.to_string()),
        }),
        _ => None,
    })
}

fn report_failure(
    phase: Phase,
    planned: &PlannedCommand,
    err: &TargetError,
    output: Option<&CommandOutput>,
    execute_output: Option<&CommandOutput>,
) {
    error!(
        host = %planned.host,
        targets = ?planned.targets,
        "{} failed: {}",
        phase,
        err
    );
    for (label, out) in [("output", output), ("benchmark output", execute_output)] {
        let Some(out) = out else { continue };
        let stdout = out.stdout_lossy();
        let stderr = out.stderr_lossy();
        if !stdout.trim().is_empty() {
            warn!(host = %planned.host, "{} stdout:\n{}", label, tail_lines(&stdout, DIAGNOSTIC_TAIL_LINES));
        }
        if !stderr.trim().is_empty() {
            warn!(host = %planned.host, "{} stderr:\n{}", label, tail_lines(&stderr, DIAGNOSTIC_TAIL_LINES));
        }
    }
}

/// Hosts that passed the reachability preflight, and those that did not.
#[derive(Debug, Default)]
pub struct HostCheck {
    /// Input hosts that answered, original order and duplicates kept.
    pub reachable: Vec<HostId>,
    pub unreachable: Vec<(HostId, TargetError)>,
}

impl HostCheck {
    /// Split `targets` into those on reachable hosts and preflight failures
    /// for the rest.
    pub fn partition(&self, targets: Vec<RemoteTarget>) -> (Vec<RemoteTarget>, Vec<TargetFailure>) {
        let mut failures = Vec::new();
        let mut kept = Vec::with_capacity(targets.len());
        for target in targets {
            match self.unreachable.iter().find(|(h, _)| h == target.host()) {
                Some((host, err)) => failures.push(TargetFailure {
                    target: target.index(),
                    host: host.clone(),
                    stage: FailureStage::Preflight,
                    reason: err.to_string(),
                }),
                None => kept.push(target),
            }
        }
        (kept, failures)
    }
}

/// Probe every distinct host concurrently with a no-op remote command.
///
/// ## Parameters
/// - `shell`: Transport used for the probes
/// - `hosts`: Host list, duplicates allowed; each host is probed once
/// - `limit`: Per-probe timeout
///
/// ## Returns
/// A [`HostCheck`] splitting `hosts` into reachable and unreachable ones,
/// the latter with the reason. Use [`HostCheck::partition`] to drop the
/// targets of unreachable hosts.
pub async fn verify_hosts(
    shell: Arc<dyn RemoteShell>,
    hosts: &[HostId],
    limit: Option<Duration>,
) -> HostCheck {
    let mut distinct: Vec<&HostId> = Vec::new();
    for host in hosts {
        if !distinct.contains(&host) {
            distinct.push(host);
        }
    }

    let handles: Vec<_> = distinct
        .into_iter()
        .map(|host| {
            let shell = Arc::clone(&shell);
            let task_host = host.clone();
            let handle = tokio::spawn(async move {
                let probe = RemoteInvocation::new(["exit", "0"]).with_tty();
                let call = shell.run_remote(&task_host, &probe);
                let result = match limit {
                    Some(limit) => timeout(limit, call)
                        .await
                        .unwrap_or(Err(TargetError::TimedOut(limit))),
                    None => call.await,
                };
                match result {
                    Ok(out) if out.success => Ok(()),
                    Ok(out) => Err(TargetError::Unreachable { status: out.status }),
                    Err(e) => Err(e),
                }
            });
            (host.clone(), handle)
        })
        .collect();

    let mut down: HashMap<HostId, TargetError> = HashMap::new();
    for (host, handle) in handles {
        let result = handle
            .await
            .unwrap_or_else(|e| Err(TargetError::Worker(e.to_string())));
        match result {
            Ok(()) => debug!(host = %host, "Host reachable"),
            Err(e) => {
                warn!(host = %host, error = %e, "Host unreachable, excluding it from the run");
                down.insert(host, e);
            }
        }
    }

    let reachable = hosts
        .iter()
        .filter(|h| !down.contains_key(*h))
        .cloned()
        .collect();
    let mut unreachable: Vec<(HostId, TargetError)> = down.into_iter().collect();
    unreachable.sort_by(|a, b| a.0.cmp(&b.0));

    HostCheck {
        reachable,
        unreachable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockOp, MockShell};

    const PAYLOAD: &str = r#"{"threads":4,"connections":10,"time_set":"10s","time_run":"10s",
        "requests":1000,"rps":"100","read":"1MB","bandwidth":"100KB",
        "thread_stat_latency":{"mean":"10ms","stdev":"2ms","max":"50ms","+/- stdev":"70%"},
        "thread_stat_rps":{"mean":"25","stdev":"1","max":"30","+/- stdev":"60%"}}"#;

    fn orchestrator(shell: Arc<MockShell>, hosts: &[&str]) -> Orchestrator {
        let hosts: Vec<HostId> = hosts.iter().map(|h| HostId::from(*h)).collect();
        let targets = RemoteTarget::fleet(&hosts, "test", "/tmp", &["http://x".to_string()]);
        Orchestrator::new(shell, CommandPlanner::new("wrk", "/tmp/wrk"), targets)
    }

    #[test]
    fn test_state_machine_happy_path() {
        let mut state = RunState::Init;
        let mut seen = Vec::new();
        loop {
            state = state.next(false);
            match state.phase() {
                Some(phase) => seen.push(phase),
                None => break,
            }
        }
        assert_eq!(seen, Phase::ALL.to_vec());
        assert_eq!(state, RunState::Done);
    }

    #[test]
    fn test_state_machine_interrupt_jumps_to_cleanup() {
        assert_eq!(RunState::Init.next(true), RunState::Done);
        for phase in [Phase::Deploy, Phase::Execute, Phase::Collect] {
            assert_eq!(
                RunState::Running(phase).next(true),
                RunState::Running(Phase::Cleanup)
            );
        }
        assert_eq!(RunState::Running(Phase::Cleanup).next(true), RunState::Done);
    }

    #[tokio::test]
    async fn test_run_collects_every_payload() {
        let shell = Arc::new(
            MockShell::new()
                .with_payload("a", PAYLOAD)
                .with_payload("b", PAYLOAD),
        );
        let outcome = orchestrator(Arc::clone(&shell), &["a", "b"]).run().await.unwrap();

        assert_eq!(outcome.payloads.len(), 2);
        assert_eq!(outcome.payloads[0].target, 0);
        assert_eq!(outcome.payloads[1].host, HostId::from("b"));
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.completed, Phase::ALL.to_vec());
        assert!(!outcome.interrupted);
    }

    #[tokio::test]
    async fn test_failed_deploy_skips_work_but_not_cleanup() {
        let shell = Arc::new(
            MockShell::new()
                .with_payload("a", PAYLOAD)
                .with_failure("b", MockOp::Copy),
        );
        let outcome = orchestrator(Arc::clone(&shell), &["a", "b"]).run().await.unwrap();

        assert_eq!(outcome.payloads.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].stage, FailureStage::Phase(Phase::Deploy));
        assert!(shell
            .calls_for(MockOp::Execute)
            .iter()
            .all(|c| c.host == HostId::from("a")));
        assert_eq!(shell.calls_for(MockOp::Cleanup).len(), 2);
    }

    #[tokio::test]
    async fn test_cleanup_failure_keeps_target_results() {
        let shell = Arc::new(
            MockShell::new()
                .with_payload("a", PAYLOAD)
                .with_payload("b", PAYLOAD)
                .with_failure("a", MockOp::Cleanup),
        );
        let outcome = orchestrator(shell, &["a", "b"]).run().await.unwrap();

        assert_eq!(outcome.payloads.len(), 2);
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.cleanup_failures.len(), 1);
        assert_eq!(outcome.cleanup_failures[0].host, HostId::from("a"));
    }

    #[tokio::test]
    async fn test_cleanup_that_cannot_start_still_returns_outcome() {
        let shell = Arc::new(
            MockShell::new()
                .with_payload("a", PAYLOAD)
                .with_payload("b", PAYLOAD)
                .with_spawn_failure("a", MockOp::Cleanup)
                .with_spawn_failure("b", MockOp::Cleanup),
        );
        let outcome = orchestrator(Arc::clone(&shell), &["a", "b"]).run().await.unwrap();

        assert_eq!(outcome.payloads.len(), 2);
        assert_eq!(outcome.completed, Phase::ALL.to_vec());
        assert_eq!(outcome.cleanup_failures.len(), 2);
        assert!(outcome.cleanup_failures[0].reason.contains("failed to spawn"));
        assert_eq!(shell.calls_for(MockOp::Cleanup).len(), 2);
    }

    #[tokio::test]
    async fn test_empty_collect_is_payload_missing() {
        let shell = Arc::new(MockShell::new());
        let outcome = orchestrator(shell, &["a"]).run().await.unwrap();
        assert!(outcome.payloads.is_empty());
        assert_eq!(outcome.failures[0].stage, FailureStage::Phase(Phase::Collect));
        assert_eq!(outcome.failures[0].reason, TargetError::PayloadMissing.to_string());
    }

    #[tokio::test]
    async fn test_phase_timeout_abandons_command() {
        let shell = Arc::new(
            MockShell::new()
                .with_payload("a", PAYLOAD)
                .with_payload("slow", PAYLOAD)
                .with_delay("slow", MockOp::Collect, Duration::from_secs(5)),
        );
        let timeouts = PhaseTimeouts {
            collect: Some(Duration::from_millis(50)),
            ..PhaseTimeouts::default()
        };
        let outcome = orchestrator(shell, &["a", "slow"])
            .with_timeouts(timeouts)
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.payloads.len(), 1);
        assert!(outcome.failures[0].reason.contains("abandoned"));
    }

    #[tokio::test]
    async fn test_interrupt_before_start() {
        let shell = Arc::new(MockShell::new());
        let orch = orchestrator(Arc::clone(&shell), &["a"]);
        orch.interrupt_handle().interrupt();
        assert!(matches!(orch.run().await, Err(RunError::Interrupted)));
        assert!(shell.calls().is_empty());
    }

    #[tokio::test]
    async fn test_verify_hosts_filters_unreachable() {
        let shell = Arc::new(MockShell::new().with_failure("down", MockOp::Probe));
        let hosts: Vec<HostId> = ["a", "down", "a"].iter().map(|h| HostId::from(*h)).collect();
        let check = verify_hosts(shell.clone(), &hosts, None).await;

        assert_eq!(check.reachable, vec![HostId::from("a"), HostId::from("a")]);
        assert_eq!(check.unreachable.len(), 1);
        assert_eq!(check.unreachable[0].0, HostId::from("down"));
        assert_eq!(shell.calls_for(MockOp::Probe).len(), 2);

        let targets = RemoteTarget::fleet(&hosts, "t", "/tmp", &[]);
        let (kept, failures) = check.partition(targets);
        assert_eq!(kept.iter().map(|t| t.index()).collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].target, 1);
        assert_eq!(failures[0].stage, FailureStage::Preflight);
    }
}
