//! # Unit Parsing
//!
//! wrk reports most figures as human-readable magnitude strings such as
//! `"512.30us"`, `"1.2MB"`, `"3.4k"` or `"68.75%"`. Everything downstream of
//! this module works on canonical values instead:
//!
//! | Dimension      | Canonical unit | Accepted suffixes                    |
//! |----------------|----------------|--------------------------------------|
//! | `Time`         | seconds        | `us`, `ms`, `s`, `m`, `h` (none = s) |
//! | `BinarySize`   | bytes          | `B`, `KB`, `MB`, `GB`, `TB`, `PB`    |
//! | `Metric`       | plain count    | `k`/`K`, `M`, `G`, `T`, `P`          |
//! | `Percentage`   | fraction 0..1  | `%` (required)                       |
//!
//! Binary sizes scale by powers of 1024, metric counts by powers of 1000.
//! Parsing is pure; a value that does not fit its dimension yields a
//! [`FormatError`].

use crate::error::FormatError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The physical meaning of a magnitude string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Time,
    BinarySize,
    Metric,
    Percentage,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Time => write!(f, "time"),
            Dimension::BinarySize => write!(f, "binary size"),
            Dimension::Metric => write!(f, "metric"),
            Dimension::Percentage => write!(f, "percentage"),
        }
    }
}

/// A canonical value together with the dimension it was parsed as.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantity {
    pub value: f64,
    pub dimension: Dimension,
}

impl Dimension {
    /// Parse `input` in this dimension and return only the canonical value.
    pub fn parse(self, input: &str) -> Result<f64, FormatError> {
        parse(input, self).map(|q| q.value)
    }

    /// `(multiplier, divisor)` for `unit`. Sub-unit scales divide by an
    /// exact power of ten so `"1500ms"` lands exactly on `1.5`.
    fn scale(self, unit: &str) -> Option<(f64, f64)> {
        const KIB: f64 = 1024.0;
        let factor = match self {
            Dimension::Time => match unit {
                "" | "s" => (1.0, 1.0),
                "us" => (1.0, 1e6),
                "ms" => (1.0, 1e3),
                "m" => (60.0, 1.0),
                "h" => (3600.0, 1.0),
                _ => return None,
            },
            Dimension::BinarySize => match unit {
                "" | "B" => (1.0, 1.0),
                "KB" => (KIB, 1.0),
                "MB" => (KIB * KIB, 1.0),
                "GB" => (KIB * KIB * KIB, 1.0),
                "TB" => (KIB * KIB * KIB * KIB, 1.0),
                "PB" => (KIB * KIB * KIB * KIB * KIB, 1.0),
                _ => return None,
            },
            Dimension::Metric => match unit {
                "" => (1.0, 1.0),
                "k" | "K" => (1e3, 1.0),
                "M" => (1e6, 1.0),
                "G" => (1e9, 1.0),
                "T" => (1e12, 1.0),
                "P" => (1e15, 1.0),
                _ => return None,
            },
            Dimension::Percentage => match unit {
                "%" => (1.0, 100.0),
                _ => return None,
            },
        };
        Some(factor)
    }
}

/// Parse a `<number><optional unit>` string into its canonical value.
///
/// Whitespace between the number and the unit is tolerated. The numeric
/// part is a non-negative decimal (`12`, `12.5`, `.5`).
///
/// # Examples
///
/// ```rust
/// use dwrk::units::{parse, Dimension};
///
/// assert_eq!(parse("1500ms", Dimension::Time).unwrap().value, 1.5);
/// assert_eq!(parse("2KB", Dimension::BinarySize).unwrap().value, 2048.0);
/// assert_eq!(parse("12.5%", Dimension::Percentage).unwrap().value, 0.125);
/// ```
pub fn parse(input: &str, dimension: Dimension) -> Result<Quantity, FormatError> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let unit = unit.trim_start();

    let malformed = || FormatError::Malformed {
        dimension,
        input: input.to_string(),
    };

    if number.is_empty() || !number.bytes().any(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let value: f64 = number.parse().map_err(|_| malformed())?;

    if dimension == Dimension::Percentage && unit.is_empty() {
        return Err(FormatError::MissingPercent {
            input: input.to_string(),
        });
    }

    let (multiplier, divisor) = dimension
        .scale(unit)
        .ok_or_else(|| FormatError::UnknownUnit {
            dimension,
            unit: unit.to_string(),
            input: input.to_string(),
        })?;

    Ok(Quantity {
        value: value * multiplier / divisor,
        dimension,
    })
}
