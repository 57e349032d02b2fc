//! # Remote Transport Layer
//!
//! The orchestrator only needs two primitives from the outside world:
//!
//! - copy a local file to a path on a host, and
//! - run an argv on a host and capture stdout, stderr and exit status.
//!
//! [`RemoteShell`] is that contract. [`SshTransport`] implements it with the
//! system `ssh`/`scp` binaries; [`mock::MockShell`] implements it in memory
//! for tests.

use crate::error::TargetError;
use crate::target::HostId;
use async_trait::async_trait;
use std::fmt;
use std::path::Path;

pub mod mock;
pub mod ssh;

pub use mock::MockShell;
pub use ssh::SshTransport;

/// A command to run on a remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteInvocation {
    /// The remote argv. Each element reaches the remote side as one word.
    pub argv: Vec<String>,
    /// Allocate a pseudo-terminal even though stdin is not a terminal, so
    /// the remote session is torn down when the connection drops.
    pub force_tty: bool,
}

impl RemoteInvocation {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            force_tty: false,
        }
    }

    pub fn with_tty(mut self) -> Self {
        self.force_tty = true;
        self
    }

    /// The program name (first argv element), if any.
    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }
}

impl fmt::Display for RemoteInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words: Vec<String> = self.argv.iter().map(|w| shell_quote(w)).collect();
        write!(f, "{}", words.join(" "))
    }
}

/// Everything a finished local process left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    /// Human-readable exit status (`exit status: 255`, `signal: 9`, ...).
    pub status: String,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Remote command execution and file copy.
///
/// A non-zero remote exit status is *not* an `Err`: the output is returned
/// with `success == false` so callers can still show what the host printed.
/// `Err` is reserved for failures that produced no output at all.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Copy `local` to `remote` on `host`.
    async fn copy_file(
        &self,
        local: &Path,
        host: &HostId,
        remote: &str,
    ) -> Result<CommandOutput, TargetError>;

    /// Run `invocation` on `host`.
    async fn run_remote(
        &self,
        host: &HostId,
        invocation: &RemoteInvocation,
    ) -> Result<CommandOutput, TargetError>;
}

/// Quote `word` for a POSIX shell. Words made only of safe characters are
/// returned unchanged.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c));
    if safe {
        return word.to_string();
    }

    let mut out = String::with_capacity(word.len() + 2);
    out.push('\'');
    for c in word.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}
