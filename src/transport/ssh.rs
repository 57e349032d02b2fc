//! `ssh`/`scp` backed [`RemoteShell`].
//!
//! Every call spawns one local child process. Children are placed in their
//! own process group so a terminal Ctrl-C reaches only this process, and are
//! killed if the future driving them is dropped (phase timeout).

use super::{shell_quote, CommandOutput, RemoteInvocation, RemoteShell};
use crate::error::TargetError;
use crate::target::HostId;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Options passed to every `ssh` and `scp` invocation before user options.
const BASE_OPTIONS: &[&str] = &[
    "StrictHostKeyChecking=accept-new",
    "BatchMode=yes",
    "ConnectTimeout=10",
    "ServerAliveInterval=30",
    "LogLevel=ERROR",
];

#[derive(Debug, Clone)]
pub struct SshTransport {
    ssh_program: String,
    scp_program: String,
    options: Vec<String>,
}

impl Default for SshTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SshTransport {
    pub fn new() -> Self {
        Self {
            ssh_program: "ssh".to_string(),
            scp_program: "scp".to_string(),
            options: BASE_OPTIONS.iter().map(|o| o.to_string()).collect(),
        }
    }

    /// Append extra `-o` options (`Port=2222`, `User=bench`, ...).
    pub fn with_options(mut self, options: &[String]) -> Self {
        self.options.extend(options.iter().cloned());
        self
    }

    /// Use different client binaries, e.g. a wrapper script.
    pub fn with_programs(mut self, ssh: impl Into<String>, scp: impl Into<String>) -> Self {
        self.ssh_program = ssh.into();
        self.scp_program = scp.into();
        self
    }

    fn option_args(&self) -> Vec<String> {
        self.options
            .iter()
            .flat_map(|o| ["-o".to_string(), o.clone()])
            .collect()
    }

    /// Full local argv for `ssh` running `invocation` on `host`.
    pub fn ssh_args(&self, host: &HostId, invocation: &RemoteInvocation) -> Vec<String> {
        let mut args = Vec::new();
        if invocation.force_tty {
            args.extend(["-t", "-t"].map(String::from));
        }
        args.push("-q".to_string());
        args.extend(self.option_args());
        args.push(host.to_string());
        // ssh joins the remote words with spaces and hands them to the
        // remote login shell, so each word is quoted here.
        args.extend(invocation.argv.iter().map(|w| shell_quote(w)));
        args
    }

    /// Full local argv for `scp` copying `local` to `host:remote`.
    pub fn scp_args(&self, local: &Path, host: &HostId, remote: &str) -> Vec<String> {
        let mut args = vec!["-q".to_string()];
        args.extend(self.option_args());
        args.push(local.display().to_string());
        args.push(format!("{}:{}", host, remote));
        args
    }

    async fn spawn(&self, program: &str, args: Vec<String>) -> Result<CommandOutput, TargetError> {
        debug!("exec: {} {}", program, args.join(" "));

        let mut command = Command::new(program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let output = command.output().await.map_err(|source| TargetError::Spawn {
            program: program.to_string(),
            source,
        })?;

        Ok(CommandOutput {
            success: output.status.success(),
            status: output.status.to_string(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

#[async_trait]
impl RemoteShell for SshTransport {
    async fn copy_file(
        &self,
        local: &Path,
        host: &HostId,
        remote: &str,
    ) -> Result<CommandOutput, TargetError> {
        let args = self.scp_args(local, host, remote);
        self.spawn(&self.scp_program, args).await
    }

    async fn run_remote(
        &self,
        host: &HostId,
        invocation: &RemoteInvocation,
    ) -> Result<CommandOutput, TargetError> {
        let args = self.ssh_args(host, invocation);
        self.spawn(&self.ssh_program, args).await
    }
}
