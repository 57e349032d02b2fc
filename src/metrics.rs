//! # Summary Records
//!
//! A [`SummaryRecord`] is the normalized form of one wrk result document.
//! Every field is canonical (seconds, bytes, plain counts, fractions), so
//! records coming from different hosts can be merged without looking at
//! the raw samples they were computed from.
//!
//! ## Merge semantics
//!
//! | Field                              | Combined as                                    |
//! |------------------------------------|------------------------------------------------|
//! | threads, connections, requests     | sum                                            |
//! | rps, read, bandwidth               | sum                                            |
//! | time_set, time_run                 | mean weighted by `sample_weight`               |
//! | stat block `mean`                  | mean weighted by request count                 |
//! | stat block `stdev`                 | pooled (parallel) variance, request weighted   |
//! | stat block `max`                   | max                                            |
//! | stat block `within_stdev`          | kept for a single host, `None` once combined   |
//! | sample_weight                      | sum                                            |
//!
//! The fraction of samples within one standard deviation of the mean cannot
//! be recovered from two summaries, so a record that represents more than
//! one host reports it as unknown.

use crate::error::FormatError;
use crate::units::Dimension;
use serde::{Deserialize, Serialize};

/// A scalar as it appears in a result document: either a JSON number or a
/// magnitude string such as `"1.2MB"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(serde_json::Number),
    Text(String),
}

impl RawValue {
    fn text(&self) -> String {
        match self {
            RawValue::Number(n) => n.to_string(),
            RawValue::Text(s) => s.trim().to_string(),
        }
    }

    fn count(&self) -> Result<u64, FormatError> {
        let invalid = || FormatError::InvalidCount { input: self.text() };
        match self {
            RawValue::Number(n) => n
                .as_u64()
                .or_else(|| {
                    n.as_f64()
                        .filter(|v| v.is_finite() && *v >= 0.0)
                        .map(|v| v.trunc() as u64)
                })
                .ok_or_else(invalid),
            RawValue::Text(s) => s.trim().parse::<u64>().map_err(|_| invalid()),
        }
    }
}

/// One `thread_stat_*` object of a result document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawStatBlock {
    pub mean: Option<RawValue>,
    pub stdev: Option<RawValue>,
    pub max: Option<RawValue>,
    #[serde(rename = "+/- stdev")]
    pub within_stdev: Option<RawValue>,
}

/// A decoded but not yet normalized result document.
///
/// Every field is optional and unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSummary {
    pub threads: Option<RawValue>,
    pub connections: Option<RawValue>,
    pub time_set: Option<RawValue>,
    pub time_run: Option<RawValue>,
    pub requests: Option<RawValue>,
    pub rps: Option<RawValue>,
    pub read: Option<RawValue>,
    pub bandwidth: Option<RawValue>,
    pub thread_stat_latency: Option<RawStatBlock>,
    pub thread_stat_rps: Option<RawStatBlock>,
}

impl RawSummary {
    /// Decode a result document from the bytes captured by COLLECT.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Mean, spread and peak of one per-thread statistic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatBlock {
    pub mean: f64,
    pub stdev: f64,
    pub max: f64,
    /// Fraction of samples within one stdev of the mean (`"+/- stdev"`).
    /// `None` once the block summarizes more than one host.
    pub within_stdev: Option<f64>,
}

impl Default for StatBlock {
    fn default() -> Self {
        Self {
            mean: 0.0,
            stdev: 0.0,
            max: 0.0,
            within_stdev: Some(0.0),
        }
    }
}

impl StatBlock {
    fn parse(raw: &RawStatBlock, dimension: Dimension, field: &str) -> Result<Self, FormatError> {
        Ok(Self {
            mean: measure(raw.mean.as_ref(), dimension, &format!("{field}.mean"))?,
            stdev: measure(raw.stdev.as_ref(), dimension, &format!("{field}.stdev"))?,
            max: measure(raw.max.as_ref(), dimension, &format!("{field}.max"))?,
            within_stdev: Some(measure(
                raw.within_stdev.as_ref(),
                Dimension::Percentage,
                &format!("{field}.+/- stdev"),
            )?),
        })
    }

    /// Combine two blocks whose underlying sample counts are `na` and `nb`.
    /// The `+/- stdev` share cannot be recovered from two summaries, so it
    /// becomes `None`.
    fn merge(a: &Self, b: &Self, na: f64, nb: f64) -> Self {
        let mean = weighted_mean(a.mean, b.mean, na, nb);

        let total = na + nb;
        let stdev = if total > 0.0 {
            let second_moment = (na * (a.stdev * a.stdev + a.mean * a.mean)
                + nb * (b.stdev * b.stdev + b.mean * b.mean))
                / total;
            (second_moment - mean * mean).max(0.0).sqrt()
        } else {
            0.0
        };

        Self {
            mean,
            stdev,
            max: a.max.max(b.max),
            within_stdev: None,
        }
    }
}

/// Normalized benchmark outcome of one host, or of several hosts merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub threads: u64,
    pub connections: u64,
    /// Configured duration, seconds.
    pub time_set: f64,
    /// Measured duration, seconds.
    pub time_run: f64,
    pub requests: u64,
    /// Requests per second.
    pub rps: f64,
    /// Bytes read.
    pub read: f64,
    /// Bytes per second.
    pub bandwidth: f64,
    /// Per-thread latency, seconds.
    #[serde(rename = "thread_stat_latency")]
    pub latency: StatBlock,
    /// Per-thread requests per second.
    #[serde(rename = "thread_stat_rps")]
    pub rps_stat: StatBlock,
    /// Number of host results folded into this record.
    pub sample_weight: u64,
}

impl Default for SummaryRecord {
    fn default() -> Self {
        Self::empty()
    }
}

impl SummaryRecord {
    /// The neutral element of [`merge`](Self::merge): all zeros, weight 0.
    pub fn empty() -> Self {
        Self {
            threads: 0,
            connections: 0,
            time_set: 0.0,
            time_run: 0.0,
            requests: 0,
            rps: 0.0,
            read: 0.0,
            bandwidth: 0.0,
            latency: StatBlock::default(),
            rps_stat: StatBlock::default(),
            sample_weight: 0,
        }
    }

    /// Normalize a decoded result document.
    ///
    /// Absent fields stay at zero. Any field that is present but cannot be
    /// parsed fails the whole record.
    ///
    /// ## Returns
    /// A record with `sample_weight == 1`, or the first [`FormatError`],
    /// which names the offending field.
    pub fn parse(raw: &RawSummary) -> Result<Self, FormatError> {
        Ok(Self {
            threads: count(raw.threads.as_ref(), "threads")?,
            connections: count(raw.connections.as_ref(), "connections")?,
            time_set: measure(raw.time_set.as_ref(), Dimension::Time, "time_set")?,
            time_run: measure(raw.time_run.as_ref(), Dimension::Time, "time_run")?,
            requests: count(raw.requests.as_ref(), "requests")?,
            rps: measure(raw.rps.as_ref(), Dimension::Metric, "rps")?,
            read: measure(raw.read.as_ref(), Dimension::BinarySize, "read")?,
            bandwidth: measure(raw.bandwidth.as_ref(), Dimension::BinarySize, "bandwidth")?,
            latency: match &raw.thread_stat_latency {
                Some(block) => StatBlock::parse(block, Dimension::Time, "thread_stat_latency")?,
                None => StatBlock::default(),
            },
            rps_stat: match &raw.thread_stat_rps {
                Some(block) => StatBlock::parse(block, Dimension::Metric, "thread_stat_rps")?,
                None => StatBlock::default(),
            },
            sample_weight: 1,
        })
    }

    /// Combine two records as if one client had produced both.
    ///
    /// ## Parameters
    /// - `other`: The record to fold in; either side may itself be a merge
    ///
    /// ## Returns
    /// The combined record. The operation is associative and commutative
    /// up to floating point rounding, and [`SummaryRecord::empty`] is its
    /// identity.
    ///
    /// ## Combination Rules
    ///
    /// - **Counters** (`threads`, `connections`, `requests`, `rps`, `read`,
    ///   `bandwidth`): summed
    /// - **Durations** (`time_set`, `time_run`): mean weighted by
    ///   `sample_weight`
    /// - **Stat blocks**: means weighted by request count, standard
    ///   deviations pooled from both sides' second moments, maxima by max
    /// - **`+/- stdev`**: unknown (`None`) once two hosts are involved
    ///
    /// ## Examples
    ///
    /// ```rust
    /// use dwrk::{RawSummary, SummaryRecord};
    ///
    /// let raw = RawSummary::from_slice(br#"{"threads":2,"requests":100}"#).unwrap();
    /// let one = SummaryRecord::parse(&raw).unwrap();
    /// let both = one.clone().merge(one);
    /// assert_eq!(both.threads, 4);
    /// assert_eq!(both.requests, 200);
    /// assert_eq!(both.sample_weight, 2);
    /// ```
    pub fn merge(self, other: SummaryRecord) -> SummaryRecord {
        // A weight-0 record stands for no host at all.
        if self.sample_weight == 0 {
            return other;
        }
        if other.sample_weight == 0 {
            return self;
        }

        let (na, nb) = request_weights(&self, &other);
        let (wa, wb) = (self.sample_weight as f64, other.sample_weight as f64);

        SummaryRecord {
            threads: self.threads + other.threads,
            connections: self.connections + other.connections,
            time_set: weighted_mean(self.time_set, other.time_set, wa, wb),
            time_run: weighted_mean(self.time_run, other.time_run, wa, wb),
            requests: self.requests + other.requests,
            rps: self.rps + other.rps,
            read: self.read + other.read,
            bandwidth: self.bandwidth + other.bandwidth,
            latency: StatBlock::merge(&self.latency, &other.latency, na, nb),
            rps_stat: StatBlock::merge(&self.rps_stat, &other.rps_stat, na, nb),
            sample_weight: self.sample_weight + other.sample_weight,
        }
    }
}

/// Stat blocks are weighted by how much traffic each side represents. When
/// neither side reports any requests, fall back to the host counts.
fn request_weights(a: &SummaryRecord, b: &SummaryRecord) -> (f64, f64) {
    if a.requests + b.requests > 0 {
        (a.requests as f64, b.requests as f64)
    } else {
        (a.sample_weight as f64, b.sample_weight as f64)
    }
}

fn weighted_mean(a: f64, b: f64, wa: f64, wb: f64) -> f64 {
    let total = wa + wb;
    if total > 0.0 {
        (a * wa + b * wb) / total
    } else {
        0.0
    }
}

fn measure(raw: Option<&RawValue>, dimension: Dimension, field: &str) -> Result<f64, FormatError> {
    match raw {
        Some(value) => dimension.parse(&value.text()).map_err(|e| e.in_field(field)),
        None => Ok(0.0),
    }
}

fn count(raw: Option<&RawValue>, field: &str) -> Result<u64, FormatError> {
    match raw {
        Some(value) => value.count().map_err(|e| e.in_field(field)),
        None => Ok(0),
    }
}
