// SPDX-License-Identifier: Apache-2.0

//! Derivation of the effective plan from requested settings.

use crate::error::Error;
use crate::{Mode, RequestedSettings, Scenario};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Slack factor ensuring the Offline query outlasts the target duration.
const K_SLACK: f64 = 1.1;

/// Within-query sample positions pack into 24 bits of a sample id.
pub(crate) const MAX_SAMPLES_PER_QUERY: u64 = 1 << 24;

/// Query ids pack into the remaining 40 bits of a sample id.
pub(crate) const MAX_QUERY_COUNT: u64 = 1 << 40;

/// A recoverable configuration problem: the requested value was replaced by
/// a fallback and resolution continued.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigEvent {
    /// Name of the offending requested field.
    pub field: &'static str,
    /// The value that was requested.
    pub requested: String,
    /// The value used instead.
    pub fallback: String,
}

impl fmt::Display for ConfigEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid value for {}: {}; using {}",
            self.field, self.requested, self.fallback
        )
    }
}

/// The immutable internal plan every component consumes.
///
/// Constructed once by [`resolve`]; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveSettings {
    /// Traffic pattern to drive.
    pub scenario: Scenario,
    /// What the run measures.
    pub mode: Mode,
    /// Samples grouped into each query.
    pub samples_per_query: u64,
    /// Issue rate in queries per second. Always positive.
    pub target_qps: f64,
    /// Latency bound judged at `target_latency_percentile`. Zero for Offline.
    pub target_latency: Duration,
    /// Quantile at which latency is judged. In (0, 1).
    pub target_latency_percentile: f64,
    /// Maximum queries in flight; -1 means unbounded.
    pub max_async_queries: i64,
    /// Minimum measured time before draining. Zeroed by Offline coalescing.
    pub target_duration: Duration,
    /// Requested minimum duration, kept for reporting.
    pub min_duration: Duration,
    /// Hard duration cap; zero disables it.
    pub max_duration: Duration,
    /// Minimum number of measured queries.
    pub min_query_count: u64,
    /// Hard query cap; zero disables it.
    pub max_query_count: u64,
    /// `min_query_count * samples_per_query`.
    pub min_sample_count: u64,
    /// Size of the loaded working set.
    pub performance_sample_count: u64,
    /// Seed for the library shuffle stream.
    pub qsl_rng_seed: u64,
    /// Seed for the per-query sample-selection stream.
    pub sample_index_rng_seed: u64,
    /// Seed for the Poisson schedule-jitter stream.
    pub schedule_rng_seed: u64,
    /// Seed for the accuracy-log sampling stream.
    pub accuracy_log_rng_seed: u64,
    /// Probability that a query's responses reach the accuracy log in
    /// performance runs.
    pub accuracy_log_probability: f64,
    /// Issue each loaded sample exactly once across the run.
    pub performance_issue_unique: bool,
    /// Issue the same sample in every query slot.
    pub performance_issue_same: bool,
    /// Which loaded sample `performance_issue_same` repeats.
    pub performance_issue_same_index: u64,
    /// Merge overdue Server queries into the next issued batch.
    pub server_coalesce_queries: bool,
}

impl EffectiveSettings {
    /// True when the number of in-flight queries is not capped.
    #[must_use]
    pub fn unbounded_async_queries(&self) -> bool {
        self.max_async_queries < 0
    }
}

/// Derives the effective plan from `requested` and the library's
/// performance sample count.
///
/// Returns the plan plus the configuration events describing every requested
/// value that had to be replaced by a fallback. Impossible combinations are
/// rejected with an [`Error`].
pub fn resolve(
    requested: &RequestedSettings,
    library_performance_sample_count: u64,
) -> Result<(EffectiveSettings, Vec<ConfigEvent>), Error> {
    let mut events = Vec::new();

    if requested.performance_issue_same && requested.performance_issue_unique {
        return Err(Error::ExclusivePerformanceIssueFlags);
    }

    let performance_sample_count = if requested.performance_sample_count_override != 0 {
        requested.performance_sample_count_override
    } else {
        library_performance_sample_count
    };
    if performance_sample_count == 0 {
        return Err(Error::EmptySampleLibrary);
    }
    if requested.performance_issue_same
        && requested.performance_issue_same_index >= performance_sample_count
    {
        return Err(Error::SameIndexOutOfRange {
            index: requested.performance_issue_same_index,
            performance_sample_count,
        });
    }
    if requested.max_query_count >= MAX_QUERY_COUNT {
        return Err(Error::QueryCountTooLarge {
            max_query_count: requested.max_query_count,
            limit: MAX_QUERY_COUNT - 1,
        });
    }

    let mut samples_per_query = 1u64;
    let mut target_latency = Duration::ZERO;
    let mut max_async_queries = -1i64;
    let mut min_query_count = requested.min_query_count;
    let mut target_duration = requested.min_duration;

    let target_qps = match requested.scenario {
        Scenario::SingleStream => {
            max_async_queries = 1;
            let expected = positive_duration(
                requested.single_stream_expected_latency,
                "single_stream_expected_latency",
                Duration::from_millis(1),
                &mut events,
            );
            target_latency = expected;
            1e9 / expected.as_nanos() as f64
        }
        Scenario::MultiStream | Scenario::MultiStreamFree => {
            samples_per_query = requested.multi_stream_samples_per_query.max(1);
            target_latency = requested.multi_stream_target_latency;
            max_async_queries = if requested.multi_stream_max_async_queries == 0 {
                events.push(ConfigEvent {
                    field: "multi_stream_max_async_queries",
                    requested: "0".to_owned(),
                    fallback: "1".to_owned(),
                });
                1
            } else {
                requested.multi_stream_max_async_queries as i64
            };
            positive_qps(
                requested.multi_stream_target_qps,
                "multi_stream_target_qps",
                10.0,
                &mut events,
            )
        }
        Scenario::Server => {
            target_latency = requested.server_target_latency;
            positive_qps(requested.server_target_qps, "server_target_qps", 1.0, &mut events)
        }
        Scenario::Offline => {
            positive_qps(requested.offline_expected_qps, "offline_expected_qps", 1.0, &mut events)
        }
    };

    let target_latency_percentile = match requested.scenario {
        Scenario::SingleStream => percentile(
            requested.single_stream_target_latency_percentile,
            "single_stream_target_latency_percentile",
            0.90,
            &mut events,
        ),
        Scenario::MultiStream | Scenario::MultiStreamFree => percentile(
            requested.multi_stream_target_latency_percentile,
            "multi_stream_target_latency_percentile",
            0.90,
            &mut events,
        ),
        Scenario::Server => percentile(
            requested.server_target_latency_percentile,
            "server_target_latency_percentile",
            0.99,
            &mut events,
        ),
        // Offline is judged on throughput; the percentile only shapes the
        // reported statistics.
        Scenario::Offline => 0.90,
    };

    if requested.scenario == Scenario::Offline {
        // All queries coalesce into one. The requested min_query_count is
        // compared against the duration-derived *sample* count, matching the
        // original derivation even though the name suggests a query count.
        let target_sample_count =
            (K_SLACK * target_duration.as_secs_f64() * target_qps) as u64;
        samples_per_query = min_query_count.max(target_sample_count).max(1);
        if requested.performance_issue_unique || requested.performance_issue_same {
            samples_per_query = performance_sample_count;
        }
        min_query_count = 1;
        target_duration = Duration::ZERO;
    }

    if samples_per_query >= MAX_SAMPLES_PER_QUERY {
        return Err(Error::SamplesPerQueryTooLarge {
            samples_per_query,
            limit: MAX_SAMPLES_PER_QUERY - 1,
        });
    }

    let accuracy_log_probability = if (0.0..=1.0).contains(&requested.accuracy_log_probability) {
        requested.accuracy_log_probability
    } else {
        events.push(ConfigEvent {
            field: "accuracy_log_probability",
            requested: requested.accuracy_log_probability.to_string(),
            fallback: "0".to_owned(),
        });
        0.0
    };

    let effective = EffectiveSettings {
        scenario: requested.scenario,
        mode: requested.mode,
        samples_per_query,
        target_qps,
        target_latency,
        target_latency_percentile,
        max_async_queries,
        target_duration,
        min_duration: requested.min_duration,
        max_duration: requested.max_duration,
        min_query_count,
        max_query_count: requested.max_query_count,
        min_sample_count: min_query_count * samples_per_query,
        performance_sample_count,
        qsl_rng_seed: requested.qsl_rng_seed,
        sample_index_rng_seed: requested.sample_index_rng_seed,
        schedule_rng_seed: requested.schedule_rng_seed,
        accuracy_log_rng_seed: requested.accuracy_log_rng_seed,
        accuracy_log_probability,
        performance_issue_unique: requested.performance_issue_unique,
        performance_issue_same: requested.performance_issue_same,
        performance_issue_same_index: requested.performance_issue_same_index,
        server_coalesce_queries: requested.server_coalesce_queries,
    };
    Ok((effective, events))
}

fn positive_qps(value: f64, field: &'static str, fallback: f64, events: &mut Vec<ConfigEvent>) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        events.push(ConfigEvent {
            field,
            requested: value.to_string(),
            fallback: fallback.to_string(),
        });
        fallback
    }
}

fn positive_duration(
    value: Duration,
    field: &'static str,
    fallback: Duration,
    events: &mut Vec<ConfigEvent>,
) -> Duration {
    if value > Duration::ZERO {
        value
    } else {
        events.push(ConfigEvent {
            field,
            requested: format!("{value:?}"),
            fallback: format!("{fallback:?}"),
        });
        fallback
    }
}

fn percentile(value: f64, field: &'static str, fallback: f64, events: &mut Vec<ConfigEvent>) -> f64 {
    if value > 0.0 && value < 1.0 {
        value
    } else {
        events.push(ConfigEvent {
            field,
            requested: value.to_string(),
            fallback: fallback.to_string(),
        });
        fallback
    }
}
