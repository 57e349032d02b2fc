//! In-memory [`RemoteShell`] for tests.
//!
//! Every call is classified by what it does ([`MockOp`]), delayed and failed
//! according to per-host rules, and recorded with its start and end
//! instants so tests can check phase ordering.

use super::{CommandOutput, RemoteInvocation, RemoteShell};
use crate::error::TargetError;
use crate::target::HostId;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::{Duration, Instant};

/// What a recorded call was doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Copy,
    Probe,
    Execute,
    Collect,
    Cleanup,
    Other,
}

impl MockOp {
    fn classify(invocation: &RemoteInvocation) -> Self {
        match invocation.program() {
            Some("exit") => MockOp::Probe,
            Some("/bin/bash") => MockOp::Execute,
            Some("cat") => MockOp::Collect,
            Some("rm") => MockOp::Cleanup,
            _ => MockOp::Other,
        }
    }
}

/// One call made against the mock.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub host: HostId,
    pub op: MockOp,
    /// Remote argv, or `[local, remote]` for copies.
    pub argv: Vec<String>,
    pub started: Instant,
    pub finished: Instant,
}

#[derive(Debug, Default, Clone)]
struct HostRules {
    delays: HashMap<MockOp, Duration>,
    failing: HashSet<MockOp>,
    unspawnable: bool,
    unspawnable_ops: HashSet<MockOp>,
    payload: Option<String>,
}

/// Scriptable test double.
#[derive(Debug, Default)]
pub struct MockShell {
    rules: Mutex<HashMap<HostId, HostRules>>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockShell {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_rules(self, host: &str, edit: impl FnOnce(&mut HostRules)) -> Self {
        edit(self.rules.lock().entry(HostId::from(host)).or_default());
        self
    }

    /// Content `cat` returns for stat files on `host`.
    pub fn with_payload(self, host: &str, payload: impl Into<String>) -> Self {
        let payload = payload.into();
        self.with_rules(host, |r| r.payload = Some(payload))
    }

    /// Sleep before completing `op` on `host`.
    pub fn with_delay(self, host: &str, op: MockOp, delay: Duration) -> Self {
        self.with_rules(host, |r| {
            r.delays.insert(op, delay);
        })
    }

    /// Make `op` on `host` exit non-zero.
    pub fn with_failure(self, host: &str, op: MockOp) -> Self {
        self.with_rules(host, |r| {
            r.failing.insert(op);
        })
    }

    /// Make every call for `host` fail as if `ssh` could not be started.
    pub fn unspawnable(self, host: &str) -> Self {
        self.with_rules(host, |r| r.unspawnable = true)
    }

    /// Make only `op` on `host` fail as if `ssh` could not be started.
    pub fn with_spawn_failure(self, host: &str, op: MockOp) -> Self {
        self.with_rules(host, |r| {
            r.unspawnable_ops.insert(op);
        })
    }

    /// Snapshot of every call so far, in completion order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, op: MockOp) -> Vec<MockCall> {
        self.calls.lock().iter().filter(|c| c.op == op).cloned().collect()
    }

    async fn respond(
        &self,
        host: &HostId,
        op: MockOp,
        argv: Vec<String>,
    ) -> Result<CommandOutput, TargetError> {
        let rules = self.rules.lock().get(host).cloned().unwrap_or_default();
        let started = Instant::now();

        if rules.unspawnable || rules.unspawnable_ops.contains(&op) {
            self.record(host, op, argv, started);
            return Err(TargetError::Spawn {
                program: "ssh".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "mock: not spawnable"),
            });
        }

        if let Some(delay) = rules.delays.get(&op) {
            tokio::time::sleep(*delay).await;
        }

        let output = if rules.failing.contains(&op) {
            CommandOutput {
                success: false,
                status: "exit status: 255".to_string(),
                stdout: Vec::new(),
                stderr: format!("mock: {op:?} failed on {host}").into_bytes(),
            }
        } else {
            let stdout = match op {
                MockOp::Collect => rules.payload.unwrap_or_default().into_bytes(),
                MockOp::Execute => b"Running 10s test @ http://mock\n".to_vec(),
                _ => Vec::new(),
            };
            CommandOutput {
                success: true,
                status: "exit status: 0".to_string(),
                stdout,
                stderr: Vec::new(),
            }
        };

        self.record(host, op, argv, started);
        Ok(output)
    }

    fn record(&self, host: &HostId, op: MockOp, argv: Vec<String>, started: Instant) {
        self.calls.lock().push(MockCall {
            host: host.clone(),
            op,
            argv,
            started,
            finished: Instant::now(),
        });
    }
}

#[async_trait]
impl RemoteShell for MockShell {
    async fn copy_file(
        &self,
        local: &Path,
        host: &HostId,
        remote: &str,
    ) -> Result<CommandOutput, TargetError> {
        let argv = vec![local.display().to_string(), remote.to_string()];
        self.respond(host, MockOp::Copy, argv).await
    }

    async fn run_remote(
        &self,
        host: &HostId,
        invocation: &RemoteInvocation,
    ) -> Result<CommandOutput, TargetError> {
        let op = MockOp::classify(invocation);
        self.respond(host, op, invocation.argv.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_serves_payload_and_records() {
        let shell = MockShell::new().with_payload("a", "{}");
        let out = shell
            .run_remote(&HostId::from("a"), &RemoteInvocation::new(["cat", "/tmp/x"]))
            .await
            .unwrap();
        assert!(out.success);
        assert_eq!(out.stdout, b"{}");

        let calls = shell.calls_for(MockOp::Collect);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].host, HostId::from("a"));
    }

    #[tokio::test]
    async fn test_mock_failure_keeps_output() {
        let shell = MockShell::new().with_failure("b", MockOp::Copy);
        let out = shell
            .copy_file(Path::new("wrk"), &HostId::from("b"), "/tmp/wrk")
            .await
            .unwrap();
        assert!(!out.success);
        assert!(out.stderr_lossy().contains("Copy"));
    }

    #[tokio::test]
    async fn test_unspawnable_host() {
        let shell = MockShell::new().unspawnable("c");
        let err = shell
            .run_remote(&HostId::from("c"), &RemoteInvocation::new(["rm", "-f", "x"]))
            .await
            .unwrap_err();
        assert!(err.is_spawn_failure());
        assert_eq!(shell.calls_for(MockOp::Cleanup).len(), 1);
    }

    #[tokio::test]
    async fn test_spawn_failure_for_one_op() {
        let shell = MockShell::new()
            .with_payload("d", "{}")
            .with_spawn_failure("d", MockOp::Cleanup);
        let host = HostId::from("d");

        let out = shell
            .run_remote(&host, &RemoteInvocation::new(["cat", "/tmp/x"]))
            .await
            .unwrap();
        assert!(out.success);

        let err = shell
            .run_remote(&host, &RemoteInvocation::new(["rm", "-f", "x"]))
            .await
            .unwrap_err();
        assert!(err.is_spawn_failure());
    }
}
