// SPDX-License-Identifier: Apache-2.0

//! The end-of-run summary artifact.

use crate::detail::{effective_fields, write_settings_block};
use crate::error::Error;
use loadgen_config::{EffectiveSettings, Mode, Scenario};
use std::io::Write;

/// Aggregate latency statistics over the measured samples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencyStats {
    /// Number of measured samples.
    pub sample_count: u64,
    /// Smallest sample latency.
    pub min_ns: i64,
    /// Largest sample latency.
    pub max_ns: i64,
    /// Mean sample latency.
    pub mean_ns: i64,
    /// 50th percentile latency.
    pub p50_ns: i64,
    /// 90th percentile latency.
    pub p90_ns: i64,
    /// 95th percentile latency.
    pub p95_ns: i64,
    /// 99th percentile latency.
    pub p99_ns: i64,
    /// Latency at the scenario's target percentile.
    pub target_percentile_ns: i64,
    /// Completed samples per second over the issue span.
    pub qps: f64,
}

/// Everything the reporter needs to write the summary.
#[derive(Debug, Clone)]
pub struct PerformanceSummary {
    /// Scenario that was driven.
    pub scenario: Scenario,
    /// Mode that was measured.
    pub mode: Mode,
    /// Latency statistics over the measured samples.
    pub stats: LatencyStats,
    /// Queries handed to the SUT.
    pub queries_issued: u64,
    /// Queries fully completed.
    pub queries_completed: u64,
    /// Whether every service-level objective was met.
    pub valid: bool,
    /// Why the result is invalid, one reason per line.
    pub invalid_reasons: Vec<String>,
    /// Whether the run aborted before reaching DONE cleanly.
    pub aborted: bool,
}

/// Writes the summary artifact: result, statistics, and the effective
/// settings block with the exact reporting key vocabulary.
pub fn write_summary(
    w: &mut dyn Write,
    summary: &PerformanceSummary,
    effective: &EffectiveSettings,
) -> Result<(), Error> {
    write_summary_io(w, summary, effective).map_err(|source| Error::WriteError {
        artifact: "summary log",
        source,
    })
}

fn write_summary_io(
    w: &mut dyn Write,
    summary: &PerformanceSummary,
    effective: &EffectiveSettings,
) -> std::io::Result<()> {
    let bar = "================================================";
    writeln!(w, "{bar}")?;
    writeln!(w, "Benchmark Results Summary")?;
    writeln!(w, "{bar}")?;
    // The only place wall-clock time appears; measurement is monotonic.
    writeln!(w, "Timestamp : {}", chrono::Utc::now().to_rfc3339())?;
    writeln!(w, "Scenario : {}", summary.scenario)?;
    writeln!(w, "Mode : {}", summary.mode)?;
    let result = if summary.aborted {
        "ABORTED"
    } else if summary.valid {
        "VALID"
    } else {
        "INVALID"
    };
    writeln!(w, "Result : {result}")?;
    for reason in &summary.invalid_reasons {
        writeln!(w, "  * {reason}")?;
    }
    writeln!(w)?;

    let stats = &summary.stats;
    writeln!(w, "Completed samples : {}", stats.sample_count)?;
    writeln!(w, "Queries issued : {}", summary.queries_issued)?;
    writeln!(w, "Queries completed : {}", summary.queries_completed)?;
    writeln!(w, "Samples per second : {:.2}", stats.qps)?;
    writeln!(w, "Min latency (ns) : {}", stats.min_ns)?;
    writeln!(w, "Mean latency (ns) : {}", stats.mean_ns)?;
    writeln!(w, "50.00 percentile latency (ns) : {}", stats.p50_ns)?;
    writeln!(w, "90.00 percentile latency (ns) : {}", stats.p90_ns)?;
    writeln!(w, "95.00 percentile latency (ns) : {}", stats.p95_ns)?;
    writeln!(w, "99.00 percentile latency (ns) : {}", stats.p99_ns)?;
    writeln!(
        w,
        "{:.2} percentile latency (ns) : {}",
        effective.target_latency_percentile * 100.0,
        stats.target_percentile_ns
    )?;
    writeln!(w, "Max latency (ns) : {}", stats.max_ns)?;
    writeln!(w)?;

    writeln!(w, "{bar}")?;
    writeln!(w, "Effective Settings")?;
    writeln!(w, "{bar}")?;
    write_settings_block(w, "Effective Settings:", &effective_fields(effective))?;
    writeln!(w, "{bar}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadgen_config::{RequestedSettings, resolve};

    #[test]
    fn summary_contains_the_exact_reporting_keys() {
        let requested = RequestedSettings::new(Scenario::Server, Mode::PerformanceOnly);
        let (effective, _) = resolve(&requested, 64).expect("resolve");
        let summary = PerformanceSummary {
            scenario: effective.scenario,
            mode: effective.mode,
            stats: LatencyStats::default(),
            queries_issued: 10,
            queries_completed: 10,
            valid: true,
            invalid_reasons: Vec::new(),
            aborted: false,
        };

        let mut out = Vec::new();
        write_summary(&mut out, &summary, &effective).expect("write");
        let text = String::from_utf8(out).expect("utf8");

        for key in [
            "samples_per_query",
            "target_qps",
            "target_latency (ns)",
            "max_async_queries",
            "min_duration (ms)",
            "max_duration (ms)",
            "min_query_count",
            "max_query_count",
            "qsl_rng_seed",
            "sample_index_rng_seed",
            "schedule_rng_seed",
            "accuracy_log_rng_seed",
            "accuracy_log_probability",
            "performance_issue_unique",
            "performance_issue_same",
            "performance_issue_same_index",
            "performance_sample_count",
        ] {
            assert!(text.contains(&format!("{key} : ")), "missing key {key}");
        }
        assert!(text.contains("Scenario : Server"));
        assert!(text.contains("Mode : Performance"));
        assert!(text.contains("Result : VALID"));
    }

    #[test]
    fn invalid_runs_list_their_reasons() {
        let requested = RequestedSettings::new(Scenario::Offline, Mode::PerformanceOnly);
        let (effective, _) = resolve(&requested, 64).expect("resolve");
        let summary = PerformanceSummary {
            scenario: effective.scenario,
            mode: effective.mode,
            stats: LatencyStats::default(),
            queries_issued: 1,
            queries_completed: 1,
            valid: false,
            invalid_reasons: vec!["achieved QPS 5.00 below target 10".to_owned()],
            aborted: false,
        };

        let mut out = Vec::new();
        write_summary(&mut out, &summary, &effective).expect("write");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("Result : INVALID"));
        assert!(text.contains("achieved QPS 5.00 below target 10"));
    }
}
