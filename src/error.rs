//! # Error Taxonomy
//!
//! Typed errors for the three failure scopes of a run:
//!
//! - [`FormatError`]: a unit string or payload field could not be parsed.
//!   Local to one target; that target is left out of the merge.
//! - [`TargetError`]: one target failed one phase (spawn failure, non-zero
//!   exit, timeout, missing or malformed payload). Never aborts the other
//!   targets of the phase.
//! - [`RunError`]: the whole run stopped early, either because the operator
//!   interrupted it or because no process of a phase could be started.
//!
//! Application glue (`main`, host loading, the build step) uses `anyhow`
//! on top of these.

use crate::coordination::Phase;
use crate::units::Dimension;
use std::time::Duration;
use thiserror::Error;

/// A unit string or payload field that does not match the expected shape.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormatError {
    /// The value is not `<number><optional unit>`.
    #[error("malformed {dimension} value {input:?}")]
    Malformed { dimension: Dimension, input: String },

    /// The numeric part parsed but the unit is not valid for the dimension.
    #[error("unknown {dimension} unit {unit:?} in {input:?}")]
    UnknownUnit {
        dimension: Dimension,
        unit: String,
        input: String,
    },

    /// A percentage without the trailing `%`.
    #[error("percentage {input:?} is missing a trailing '%'")]
    MissingPercent { input: String },

    /// A count field that is not a non-negative integer.
    #[error("invalid count {input:?}")]
    InvalidCount { input: String },

    /// Wraps a nested error with the payload field it came from.
    #[error("field `{field}`: {source}")]
    Field {
        field: String,
        #[source]
        source: Box<FormatError>,
    },
}

impl FormatError {
    /// Attach the name of the payload field that failed to parse.
    pub fn in_field(self, field: impl Into<String>) -> Self {
        FormatError::Field {
            field: field.into(),
            source: Box::new(self),
        }
    }
}

/// Failure of a single target within a single phase.
#[derive(Debug, Error)]
pub enum TargetError {
    /// The local `ssh`/`scp` process could not be started at all.
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The remote command ran but reported failure.
    #[error("remote command exited with {status}")]
    Unreachable { status: String },

    /// The phase command did not finish within the phase timeout and was
    /// abandoned.
    #[error("abandoned after {0:?}")]
    TimedOut(Duration),

    /// COLLECT returned nothing.
    #[error("no structured result returned")]
    PayloadMissing,

    /// COLLECT returned output that is not a valid result document.
    #[error("invalid structured result: {0}")]
    PayloadInvalid(#[from] serde_json::Error),

    /// The result document decoded but a field could not be normalized.
    #[error("unusable structured result: {0}")]
    Format(#[from] FormatError),

    /// The worker task itself died (panic or cancellation).
    #[error("worker task failed: {0}")]
    Worker(String),
}

impl TargetError {
    /// True when the failure happened before any remote interaction.
    pub fn is_spawn_failure(&self) -> bool {
        matches!(self, TargetError::Spawn { .. })
    }
}

/// Conditions that stop a run before it reaches DONE normally.
#[derive(Debug, Error)]
pub enum RunError {
    /// The operator cancelled the run. Cleanup has already been attempted.
    #[error("run interrupted by operator")]
    Interrupted,

    /// Not a single process of `phase` could be started.
    #[error("{phase} phase could not start any process: {source}")]
    Infrastructure {
        phase: Phase,
        #[source]
        source: TargetError,
    },

    /// Every host failed the reachability preflight.
    #[error("none of the {0} host(s) is reachable")]
    NoReachableHosts(usize),
}
