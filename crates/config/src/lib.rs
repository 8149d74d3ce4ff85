// SPDX-License-Identifier: Apache-2.0

//! Benchmark settings for the load-generation core.
//!
//! Data model:
//! - [`RequestedSettings`] is the user-facing configuration, deserializable
//!   from a config file. Scenario-specific knobs live side by side; only the
//!   ones selected by [`Scenario`] take effect.
//! - [`EffectiveSettings`] is the self-consistent internal plan derived by
//!   [`resolve`]. It is constructed once at run start and immutable
//!   thereafter.
//!
//! Invalid requested values never abort resolution: they are reported as
//! [`ConfigEvent`]s and replaced by their defaults. Impossible combinations
//! (mutually exclusive performance-issue flags, an out-of-range fixed sample
//! index) are rejected with a hard [`error::Error`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub mod error;
mod resolve;

pub use resolve::{ConfigEvent, EffectiveSettings, resolve};

/// Traffic pattern driven against the system under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// One query at a time, the next issued when the previous completes.
    SingleStream,
    /// Fixed-period queries of several samples each.
    MultiStream,
    /// Like `MultiStream`, but the next query may issue as soon as an
    /// async slot frees instead of waiting for the period boundary.
    MultiStreamFree,
    /// Poisson arrivals at a target rate.
    Server,
    /// The whole workload coalesced into a single query.
    Offline,
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Scenario::SingleStream => "Single Stream",
            Scenario::MultiStream => "Multi Stream",
            Scenario::MultiStreamFree => "Multi Stream Free",
            Scenario::Server => "Server",
            Scenario::Offline => "Offline",
        };
        write!(f, "{label}")
    }
}

/// What the run is measuring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Accuracy phase followed by a performance phase.
    Submission,
    /// Every library sample issued exactly once; latencies are not judged.
    AccuracyOnly,
    /// Performance phase only.
    PerformanceOnly,
    /// Repeated performance runs searching for the highest passing rate.
    FindPeakPerformance,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Mode::Submission => "Submission",
            Mode::AccuracyOnly => "Accuracy",
            Mode::PerformanceOnly => "Performance",
            Mode::FindPeakPerformance => "Find Peak Performance",
        };
        write!(f, "{label}")
    }
}

/// User-facing benchmark configuration.
///
/// Duration fields deserialize from humantime strings (`"10s"`, `"500ms"`).
/// A zero `max_duration` or `max_query_count` means unbounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestedSettings {
    /// Traffic pattern to drive.
    pub scenario: Scenario,

    /// What the run measures.
    pub mode: Mode,

    /// Expected per-query latency of the SUT; sets the SingleStream pace
    /// and pass target.
    #[serde(with = "humantime_serde", default = "default_expected_latency")]
    pub single_stream_expected_latency: Duration,

    /// Quantile at which SingleStream latency is judged.
    #[serde(default = "default_ss_percentile")]
    pub single_stream_target_latency_percentile: f64,

    /// MultiStream query rate (queries per second).
    #[serde(default = "default_multi_stream_qps")]
    pub multi_stream_target_qps: f64,

    /// MultiStream per-sample latency bound.
    #[serde(with = "humantime_serde", default = "default_target_latency")]
    pub multi_stream_target_latency: Duration,

    /// Quantile at which MultiStream latency is judged.
    #[serde(default = "default_ss_percentile")]
    pub multi_stream_target_latency_percentile: f64,

    /// Samples grouped into each MultiStream query.
    #[serde(default = "default_samples_per_query")]
    pub multi_stream_samples_per_query: u64,

    /// Maximum MultiStream queries in flight.
    #[serde(default = "default_max_async")]
    pub multi_stream_max_async_queries: u64,

    /// Server arrival rate (queries per second, Poisson).
    #[serde(default = "default_qps")]
    pub server_target_qps: f64,

    /// Server per-sample latency bound.
    #[serde(with = "humantime_serde", default = "default_target_latency")]
    pub server_target_latency: Duration,

    /// Quantile at which Server latency is judged.
    #[serde(default = "default_server_percentile")]
    pub server_target_latency_percentile: f64,

    /// Merge overdue scheduled queries into the next issued batch.
    #[serde(default)]
    pub server_coalesce_queries: bool,

    /// Expected Offline throughput; sizes the single coalesced query.
    #[serde(default = "default_qps")]
    pub offline_expected_qps: f64,

    /// Minimum measured duration before the run may drain.
    #[serde(with = "humantime_serde", default = "default_min_duration")]
    pub min_duration: Duration,

    /// Hard duration cap; zero disables it.
    #[serde(with = "humantime_serde", default)]
    pub max_duration: Duration,

    /// Minimum number of measured queries.
    #[serde(default = "default_min_query_count")]
    pub min_query_count: u64,

    /// Hard query cap; zero disables it.
    #[serde(default)]
    pub max_query_count: u64,

    /// Overrides the library's performance sample count when non-zero.
    #[serde(default)]
    pub performance_sample_count_override: u64,

    /// Seed for the library shuffle stream.
    #[serde(default)]
    pub qsl_rng_seed: u64,

    /// Seed for the per-query sample-selection stream.
    #[serde(default)]
    pub sample_index_rng_seed: u64,

    /// Seed for the Poisson schedule-jitter stream.
    #[serde(default)]
    pub schedule_rng_seed: u64,

    /// Seed for the accuracy-log sampling stream.
    #[serde(default)]
    pub accuracy_log_rng_seed: u64,

    /// Probability that a query's responses are copied to the accuracy log
    /// during performance runs.
    #[serde(default)]
    pub accuracy_log_probability: f64,

    /// Issue each loaded sample exactly once across the run.
    #[serde(default)]
    pub performance_issue_unique: bool,

    /// Issue the same sample in every query slot.
    #[serde(default)]
    pub performance_issue_same: bool,

    /// Which loaded sample `performance_issue_same` repeats.
    #[serde(default)]
    pub performance_issue_same_index: u64,
}

impl RequestedSettings {
    /// A requested configuration with every knob at its default.
    #[must_use]
    pub fn new(scenario: Scenario, mode: Mode) -> Self {
        RequestedSettings {
            scenario,
            mode,
            single_stream_expected_latency: default_expected_latency(),
            single_stream_target_latency_percentile: default_ss_percentile(),
            multi_stream_target_qps: default_multi_stream_qps(),
            multi_stream_target_latency: default_target_latency(),
            multi_stream_target_latency_percentile: default_ss_percentile(),
            multi_stream_samples_per_query: default_samples_per_query(),
            multi_stream_max_async_queries: default_max_async(),
            server_target_qps: default_qps(),
            server_target_latency: default_target_latency(),
            server_target_latency_percentile: default_server_percentile(),
            server_coalesce_queries: false,
            offline_expected_qps: default_qps(),
            min_duration: default_min_duration(),
            max_duration: Duration::ZERO,
            min_query_count: default_min_query_count(),
            max_query_count: 0,
            performance_sample_count_override: 0,
            qsl_rng_seed: 0,
            sample_index_rng_seed: 0,
            schedule_rng_seed: 0,
            accuracy_log_rng_seed: 0,
            accuracy_log_probability: 0.0,
            performance_issue_unique: false,
            performance_issue_same: false,
            performance_issue_same_index: 0,
        }
    }
}

fn default_expected_latency() -> Duration {
    Duration::from_millis(1)
}

fn default_target_latency() -> Duration {
    Duration::from_millis(100)
}

fn default_ss_percentile() -> f64 {
    0.90
}

fn default_server_percentile() -> f64 {
    0.99
}

fn default_multi_stream_qps() -> f64 {
    10.0
}

fn default_samples_per_query() -> u64 {
    4
}

fn default_max_async() -> u64 {
    1
}

fn default_qps() -> f64 {
    1.0
}

fn default_min_duration() -> Duration {
    Duration::from_secs(10)
}

fn default_min_query_count() -> u64 {
    100
}

/// Where and how verbosely the run writes its artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// Directory receiving the summary, detail, and accuracy logs.
    pub output_dir: PathBuf,

    /// Prefix for every artifact file name.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Emit a detail event for every issued and completed query.
    #[serde(default)]
    pub log_detail_queries: bool,

    /// Mirror the summary to stdout when the run finishes.
    #[serde(default)]
    pub copy_summary_to_stdout: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        LogSettings {
            output_dir: PathBuf::from("."),
            prefix: default_prefix(),
            log_detail_queries: false,
            copy_summary_to_stdout: false,
        }
    }
}

fn default_prefix() -> String {
    "loadgen_".to_owned()
}
