//! # Remote Targets and Command Planning
//!
//! A [`RemoteTarget`] is one benchmark instance: a host plus a private stat
//! file path. The same host may appear several times in the host list, in
//! which case it runs several instances that share one deployed binary.
//!
//! [`CommandPlanner`] turns targets into the concrete command of each
//! lifecycle phase:
//!
//! | Phase   | Granularity | Command                                          |
//! |---------|-------------|--------------------------------------------------|
//! | DEPLOY  | per host    | copy local binary to the remote binary path      |
//! | EXECUTE | per target  | `bash -O huponexit -c '<bin> --json <stat> ...'` |
//! | COLLECT | per target  | `cat <stat>`                                     |
//! | CLEANUP | per host    | `rm -f <bin> <every stat file on the host>`      |

use crate::coordination::Phase;
use crate::transport::{shell_quote, RemoteInvocation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;

/// A host as written in the host list (`name`, `user@name`, `10.0.0.1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(String);

impl HostId {
    pub fn new(host: impl Into<String>) -> Self {
        Self(host.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HostId {
    fn from(host: &str) -> Self {
        Self::new(host)
    }
}

impl From<String> for HostId {
    fn from(host: String) -> Self {
        Self(host)
    }
}

/// One benchmark instance on one host.
///
/// Equality and hashing look at the host only, so a set of targets is the
/// set of distinct hosts.
#[derive(Debug, Clone)]
pub struct RemoteTarget {
    index: usize,
    host: HostId,
    stat_file: String,
    args: Arc<[String]>,
}

impl RemoteTarget {
    /// `stat_file` is `<scratch_dir>/stat.wrk.<run_id>.<index>`, unique per
    /// target even when hosts repeat.
    pub fn new(
        index: usize,
        host: HostId,
        run_id: &str,
        scratch_dir: &str,
        args: Arc<[String]>,
    ) -> Self {
        let stat_file = format!(
            "{}/{}.{}.{}",
            scratch_dir.trim_end_matches('/'),
            crate::defaults::STAT_FILE_PREFIX,
            run_id,
            index
        );
        Self {
            index,
            host,
            stat_file,
            args,
        }
    }

    /// Build one target per host-list entry, in order.
    ///
    /// ## Parameters
    /// - `hosts`: Host list; a host listed twice yields two targets
    /// - `run_id`: Token shared by every result file of this run
    /// - `scratch_dir`: Remote directory for result files
    /// - `args`: wrk arguments, shared by all targets
    ///
    /// ## Returns
    /// Targets indexed by their position in `hosts`. The index stays
    /// attached to the target if others are later filtered out.
    pub fn fleet(
        hosts: &[HostId],
        run_id: &str,
        scratch_dir: &str,
        args: &[String],
    ) -> Vec<RemoteTarget> {
        let args: Arc<[String]> = args.to_vec().into();
        hosts
            .iter()
            .enumerate()
            .map(|(i, h)| RemoteTarget::new(i, h.clone(), run_id, scratch_dir, Arc::clone(&args)))
            .collect()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn host(&self) -> &HostId {
        &self.host
    }

    pub fn stat_file(&self) -> &str {
        &self.stat_file
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl PartialEq for RemoteTarget {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host
    }
}

impl Eq for RemoteTarget {}

impl Hash for RemoteTarget {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.host, self.index)
    }
}

/// What a phase worker has to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseCommand {
    Copy { local: PathBuf, remote: String },
    Remote(RemoteInvocation),
}

impl fmt::Display for PhaseCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseCommand::Copy { local, remote } => {
                write!(f, "copy {} -> {}", local.display(), remote)
            }
            PhaseCommand::Remote(invocation) => write!(f, "{invocation}"),
        }
    }
}

/// A phase command bound to a host and the targets it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCommand {
    pub host: HostId,
    /// Indices of the targets this command acts for.
    pub targets: Vec<usize>,
    pub command: PhaseCommand,
}

/// Produces the command line of every lifecycle phase.
#[derive(Debug, Clone)]
pub struct CommandPlanner {
    local_binary: PathBuf,
    remote_binary: String,
}

impl CommandPlanner {
    pub fn new(local_binary: impl Into<PathBuf>, remote_binary: impl Into<String>) -> Self {
        Self {
            local_binary: local_binary.into(),
            remote_binary: remote_binary.into(),
        }
    }

    pub fn deploy(&self) -> PhaseCommand {
        PhaseCommand::Copy {
            local: self.local_binary.clone(),
            remote: self.remote_binary.clone(),
        }
    }

    /// The benchmark runs under `bash -O huponexit` on a forced tty, so it
    /// dies with the connection instead of lingering on the host.
    pub fn execute(&self, target: &RemoteTarget) -> PhaseCommand {
        let inner: Vec<String> = [self.remote_binary.as_str(), "--json", target.stat_file()]
            .into_iter()
            .chain(target.args().iter().map(String::as_str))
            .map(shell_quote)
            .collect();
        let script = inner.join(" ");
        let invocation =
            RemoteInvocation::new(["/bin/bash", "-O", "huponexit", "-c", script.as_str()])
                .with_tty();
        PhaseCommand::Remote(invocation)
    }

    pub fn collect(&self, target: &RemoteTarget) -> PhaseCommand {
        PhaseCommand::Remote(RemoteInvocation::new(["cat", target.stat_file()]))
    }

    pub fn cleanup<'a>(&self, stat_files: impl IntoIterator<Item = &'a str>) -> PhaseCommand {
        let mut argv = vec!["rm".to_string(), "-f".to_string(), self.remote_binary.clone()];
        argv.extend(stat_files.into_iter().map(String::from));
        PhaseCommand::Remote(RemoteInvocation::new(argv))
    }

    /// Plan every command of `phase` for `targets`.
    ///
    /// DEPLOY and CLEANUP are issued once per distinct host, in order of first
    /// appearance; EXECUTE and COLLECT once per target.
    ///
    /// ## Parameters
    /// - `phase`: The lifecycle phase to plan
    /// - `targets`: Targets still taking part in `phase`
    ///
    /// ## Returns
    /// One [`PlannedCommand`] per command to run, each listing the target
    /// indices it acts for. A per-host CLEANUP lists every target on that
    /// host and removes all of their result files.
    pub fn plan(&self, phase: Phase, targets: &[&RemoteTarget]) -> Vec<PlannedCommand> {
        match phase {
            Phase::Execute | Phase::Collect => targets
                .iter()
                .map(|t| PlannedCommand {
                    host: t.host().clone(),
                    targets: vec![t.index()],
                    command: if phase == Phase::Execute {
                        self.execute(t)
                    } else {
                        self.collect(t)
                    },
                })
                .collect(),
            Phase::Deploy | Phase::Cleanup => group_by_host(targets)
                .into_iter()
                .map(|(host, group)| PlannedCommand {
                    command: if phase == Phase::Deploy {
                        self.deploy()
                    } else {
                        self.cleanup(group.iter().map(|t| t.stat_file()))
                    },
                    targets: group.iter().map(|t| t.index()).collect(),
                    host,
                })
                .collect(),
        }
    }
}

fn group_by_host<'a>(targets: &[&'a RemoteTarget]) -> Vec<(HostId, Vec<&'a RemoteTarget>)> {
    let mut groups: Vec<(HostId, Vec<&'a RemoteTarget>)> = Vec::new();
    for target in targets {
        match groups.iter_mut().find(|(h, _)| h == target.host()) {
            Some((_, group)) => group.push(target),
            None => groups.push((target.host().clone(), vec![target])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn fleet(hosts: &[&str]) -> Vec<RemoteTarget> {
        let hosts: Vec<HostId> = hosts.iter().map(|h| HostId::from(*h)).collect();
        let args = vec!["-t2".to_string(), "-c10".to_string(), "http://x/a b".to_string()];
        RemoteTarget::fleet(&hosts, "run1", "/tmp/", &args)
    }

    #[test]
    fn test_stat_files_are_unique_per_target() {
        let targets = fleet(&["a", "a", "b"]);
        assert_eq!(targets[0].stat_file(), "/tmp/stat.wrk.run1.0");
        assert_eq!(targets[1].stat_file(), "/tmp/stat.wrk.run1.1");
        assert_eq!(targets[2].stat_file(), "/tmp/stat.wrk.run1.2");
    }

    #[test]
    fn test_target_identity_is_host() {
        let targets = fleet(&["a", "a", "b"]);
        assert_eq!(targets[0], targets[1]);
        assert_ne!(targets[0], targets[2]);
        let distinct: HashSet<&RemoteTarget> = targets.iter().collect();
        assert_eq!(distinct.len(), 2);
    }

    #[test]
    fn test_execute_command_line() {
        let targets = fleet(&["a"]);
        let planner = CommandPlanner::new("wrk", "/tmp/wrk");
        let PhaseCommand::Remote(inv) = planner.execute(&targets[0]) else {
            panic!("execute must be a remote command");
        };
        assert!(inv.force_tty);
        assert_eq!(&inv.argv[..4], &["/bin/bash", "-O", "huponexit", "-c"]);
        assert_eq!(
            inv.argv[4],
            "/tmp/wrk --json /tmp/stat.wrk.run1.0 -t2 -c10 'http://x/a b'"
        );
    }

    #[test]
    fn test_deploy_and_cleanup_dedupe_by_host() {
        let targets = fleet(&["a", "b", "a"]);
        let refs: Vec<&RemoteTarget> = targets.iter().collect();
        let planner = CommandPlanner::new("wrk", "/tmp/wrk");

        let deploy = planner.plan(Phase::Deploy, &refs);
        assert_eq!(deploy.len(), 2);
        assert_eq!(deploy[0].host, HostId::from("a"));
        assert_eq!(deploy[0].targets, vec![0, 2]);

        let cleanup = planner.plan(Phase::Cleanup, &refs);
        let PhaseCommand::Remote(inv) = &cleanup[0].command else {
            panic!("cleanup must be a remote command");
        };
        assert_eq!(
            inv.argv,
            vec!["rm", "-f", "/tmp/wrk", "/tmp/stat.wrk.run1.0", "/tmp/stat.wrk.run1.2"]
        );

        assert_eq!(planner.plan(Phase::Execute, &refs).len(), 3);
        assert_eq!(planner.plan(Phase::Collect, &refs).len(), 3);
    }
}
