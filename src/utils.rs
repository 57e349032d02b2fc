//! # Utility Functions
//!
//! Small helpers shared by the orchestrator and the report:
//!
//! - **Identifiers**: the per-run token embedded in stat file names
//! - **Formatting**: human-readable seconds, bytes, rates, counts and
//!   percentages, written with the same suffixes the unit parser accepts
//! - **Diagnostics**: trimming long command output for the log
//!
//! ## Usage Examples
//!
//! ```rust
//! use dwrk::utils::*;
//! use std::time::Duration;
//!
//! assert_eq!(format_duration(Duration::from_micros(1500)), "1.50ms");
//! assert_eq!(format_seconds(0.0105), "10.50ms");
//! assert_eq!(format_rate(1048576.0), "1.00 MB/s");
//! assert_eq!(format_metric(3400.0), "3.40k");
//! ```

use std::time::Duration;
use uuid::Uuid;

/// Generate the unique token of one run.
///
/// Stat files are named after it, so two concurrent runs against the same
/// hosts never read each other's results.
pub fn generate_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Format a local wall-clock duration (phase and run timings).
pub fn format_duration(duration: Duration) -> String {
    let total_ns = duration.as_nanos();

    if total_ns < 1_000 {
        format!("{}ns", total_ns)
    } else if total_ns < 1_000_000 {
        format!("{:.2}us", total_ns as f64 / 1_000.0)
    } else if total_ns < 1_000_000_000 {
        format!("{:.2}ms", total_ns as f64 / 1_000_000.0)
    } else if total_ns < 60_000_000_000 {
        format!("{:.2}s", total_ns as f64 / 1_000_000_000.0)
    } else {
        let seconds = duration.as_secs();
        let minutes = seconds / 60;
        let remaining_seconds = seconds % 60;

        if minutes < 60 {
            format!("{}m {}s", minutes, remaining_seconds)
        } else {
            let hours = minutes / 60;
            let remaining_minutes = minutes % 60;
            format!("{}h {}m {}s", hours, remaining_minutes, remaining_seconds)
        }
    }
}

/// Format a canonical time value (seconds) the way wrk prints latencies.
pub fn format_seconds(seconds: f64) -> String {
    let abs = seconds.abs();
    if abs == 0.0 {
        "0.00us".to_string()
    } else if abs < 1e-3 {
        format!("{:.2}us", seconds * 1e6)
    } else if abs < 1.0 {
        format!("{:.2}ms", seconds * 1e3)
    } else if abs < 60.0 {
        format!("{:.2}s", seconds)
    } else if abs < 3600.0 {
        format!("{:.2}m", seconds / 60.0)
    } else {
        format!("{:.2}h", seconds / 3600.0)
    }
}

/// Format a byte count with binary (1024-based) suffixes.
pub fn format_bytes_f64(bytes: f64) -> String {
    const KIB: f64 = 1024.0;
    if bytes < KIB {
        format!("{:.0} B", bytes)
    } else if bytes < KIB * KIB {
        format!("{:.2} KB", bytes / KIB)
    } else if bytes < KIB * KIB * KIB {
        format!("{:.2} MB", bytes / (KIB * KIB))
    } else if bytes < KIB * KIB * KIB * KIB {
        format!("{:.2} GB", bytes / (KIB * KIB * KIB))
    } else {
        format!("{:.2} TB", bytes / (KIB * KIB * KIB * KIB))
    }
}

/// Format a throughput in bytes per second.
pub fn format_rate(bytes_per_second: f64) -> String {
    format!("{}/s", format_bytes_f64(bytes_per_second))
}

/// Format a plain count with metric (1000-based) suffixes.
pub fn format_metric(value: f64) -> String {
    let abs = value.abs();
    if abs < 1e3 {
        format!("{:.2}", value)
    } else if abs < 1e6 {
        format!("{:.2}k", value / 1e3)
    } else if abs < 1e9 {
        format!("{:.2}M", value / 1e6)
    } else {
        format!("{:.2}G", value / 1e9)
    }
}

/// Format a fraction as a percentage; `None` renders as `n/a`.
pub fn format_percent(fraction: Option<f64>) -> String {
    match fraction {
        Some(f) => format!("{:.2}%", f * 100.0),
        None => "n/a".to_string(),
    }
}

/// The last `lines` lines of `text`, prefixed with a marker when anything
/// was cut.
pub fn tail_lines(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    if all.len() <= lines {
        return all.join("\n");
    }
    let skipped = all.len() - lines;
    format!("[... {} line(s) omitted ...]\n{}", skipped, all[skipped..].join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Dimension;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_nanos(500)), "500ns");
        assert_eq!(format_duration(Duration::from_nanos(1500)), "1.50us");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }

    #[test]
    fn test_format_seconds_scales() {
        assert_eq!(format_seconds(0.0), "0.00us");
        assert_eq!(format_seconds(0.000_512_3), "512.30us");
        assert_eq!(format_seconds(0.01), "10.00ms");
        assert_eq!(format_seconds(10.02), "10.02s");
        assert_eq!(format_seconds(90.0), "1.50m");
    }

    #[test]
    fn test_formatted_values_parse_back() {
        for s in [0.000_25, 0.0105, 2.5, 150.0] {
            let parsed = Dimension::Time.parse(&format_seconds(s)).unwrap();
            assert!((parsed - s).abs() / s < 1e-2, "{s} -> {parsed}");
        }
        let parsed = Dimension::BinarySize.parse(&format_bytes_f64(1572864.0)).unwrap();
        assert_eq!(parsed, 1572864.0);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes_f64(500.0), "500 B");
        assert_eq!(format_bytes_f64(1536.0), "1.50 KB");
        assert_eq!(format_bytes_f64(1610612736.0), "1.50 GB");
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(1024.0), "1.00 KB/s");
        assert_eq!(format_rate(1048576.0), "1.00 MB/s");
    }

    #[test]
    fn test_format_metric_and_percent() {
        assert_eq!(format_metric(999.0), "999.00");
        assert_eq!(format_metric(2_500_000.0), "2.50M");
        assert_eq!(format_percent(Some(0.6875)), "68.75%");
        assert_eq!(format_percent(None), "n/a");
    }

    #[test]
    fn test_tail_lines() {
        assert_eq!(tail_lines("a\nb\n", 5), "a\nb");
        assert_eq!(tail_lines("1\n2\n3\n4", 2), "[... 2 line(s) omitted ...]\n3\n4");
    }

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(generate_run_id(), generate_run_id());
        assert_eq!(generate_run_id().len(), 36);
    }
}
