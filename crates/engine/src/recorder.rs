// SPDX-License-Identifier: Apache-2.0

//! Latency accumulation, percentile statistics, and the pass/fail decision.

use loadgen_config::{EffectiveSettings, Scenario};
use loadgen_reporting::LatencyStats;
use parking_lot::Mutex;

const SHARD_COUNT: u64 = 16;

/// Accumulates per-sample latencies during MEASURING.
///
/// Sharded by query id so concurrent completion threads rarely contend;
/// the shards are merged once, at DONE. The issue scheduler never touches
/// this type.
pub struct LatencyRecorder {
    shards: Vec<Mutex<Vec<i64>>>,
}

impl LatencyRecorder {
    /// A recorder pre-sized for `expected_samples` measurements.
    #[must_use]
    pub fn with_expected_samples(expected_samples: u64) -> Self {
        let per_shard = (expected_samples / SHARD_COUNT + 1) as usize;
        let shards = (0..SHARD_COUNT)
            .map(|_| Mutex::new(Vec::with_capacity(per_shard)))
            .collect();
        LatencyRecorder { shards }
    }

    /// Appends one sample latency.
    pub fn record(&self, query_id: u64, latency_ns: i64) {
        self.shards[(query_id % SHARD_COUNT) as usize].lock().push(latency_ns);
    }

    /// Merges every shard into one vector. Call once, after draining.
    #[must_use]
    pub fn drain(&self) -> Vec<i64> {
        let total: usize = self.shards.iter().map(|s| s.lock().len()).sum();
        let mut merged = Vec::with_capacity(total);
        for shard in &self.shards {
            merged.append(&mut shard.lock());
        }
        merged
    }
}

/// Index of the `percentile` quantile in a sorted run of `n` samples.
#[must_use]
pub fn percentile_index(percentile: f64, n: usize) -> usize {
    let index = (percentile * n as f64).ceil() as usize;
    index.saturating_sub(1).min(n.saturating_sub(1))
}

/// Sorts `latencies` and computes the summary statistics.
///
/// The throughput denominator is the issue span; when that span is zero
/// (Offline's single query) the completion span stands in for it.
#[must_use]
pub fn compute_stats(
    mut latencies: Vec<i64>,
    target_percentile: f64,
    issue_span_ns: i64,
    completion_span_ns: i64,
) -> LatencyStats {
    if latencies.is_empty() {
        return LatencyStats::default();
    }
    latencies.sort_unstable();
    let n = latencies.len();
    let sum: i128 = latencies.iter().map(|&l| i128::from(l)).sum();

    let span_ns = if issue_span_ns > 0 {
        issue_span_ns
    } else {
        completion_span_ns
    };
    let qps = if span_ns > 0 {
        n as f64 / (span_ns as f64 / 1e9)
    } else {
        0.0
    };

    LatencyStats {
        sample_count: n as u64,
        min_ns: latencies[0],
        max_ns: latencies[n - 1],
        mean_ns: (sum / n as i128) as i64,
        p50_ns: latencies[percentile_index(0.50, n)],
        p90_ns: latencies[percentile_index(0.90, n)],
        p95_ns: latencies[percentile_index(0.95, n)],
        p99_ns: latencies[percentile_index(0.99, n)],
        target_percentile_ns: latencies[percentile_index(target_percentile, n)],
        qps,
    }
}

/// Judges the run against the scenario's service-level objectives.
///
/// Returns whether the run is valid plus one reason per violated objective.
#[must_use]
pub fn evaluate(
    settings: &EffectiveSettings,
    stats: &LatencyStats,
    queries_issued: u64,
    measured_duration_ns: i64,
) -> (bool, Vec<String>) {
    let mut reasons = Vec::new();

    let target_duration_ns = settings.target_duration.as_nanos() as i64;
    if measured_duration_ns < target_duration_ns {
        reasons.push(format!(
            "measured duration {measured_duration_ns} ns below minimum {target_duration_ns} ns"
        ));
    }
    if queries_issued < settings.min_query_count {
        reasons.push(format!(
            "issued {queries_issued} queries, minimum is {}",
            settings.min_query_count
        ));
    }
    if stats.sample_count < settings.min_sample_count {
        reasons.push(format!(
            "measured {} samples, minimum is {}",
            stats.sample_count, settings.min_sample_count
        ));
    }

    match settings.scenario {
        Scenario::SingleStream | Scenario::MultiStream | Scenario::Server => {
            let target_ns = settings.target_latency.as_nanos() as i64;
            if stats.target_percentile_ns > target_ns {
                reasons.push(format!(
                    "{:.2} percentile latency {} ns over target {} ns",
                    settings.target_latency_percentile * 100.0,
                    stats.target_percentile_ns,
                    target_ns
                ));
            }
        }
        Scenario::MultiStreamFree | Scenario::Offline => {
            if stats.qps < settings.target_qps {
                reasons.push(format!(
                    "achieved {:.2} samples per second below target {:.2}",
                    stats.qps, settings.target_qps
                ));
            }
        }
    }

    (reasons.is_empty(), reasons)
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadgen_config::{Mode, RequestedSettings, resolve};
    use pretty_assertions::assert_eq;
    use rand::{Rng, SeedableRng};
    use rand_pcg::Pcg64;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn percentile_index_matches_the_ceiling_rule() {
        assert_eq!(percentile_index(0.99, 1_000_000), 989_999);
        assert_eq!(percentile_index(0.50, 10), 4);
        assert_eq!(percentile_index(0.90, 1), 0);
        assert_eq!(percentile_index(0.999, 10), 9);
    }

    #[test]
    fn uniform_million_sample_p99_lands_on_the_analytic_value() {
        let mut rng = Pcg64::seed_from_u64(17);
        let latencies: Vec<i64> = (0..1_000_000).map(|_| rng.random_range(1000..=2000)).collect();

        let stats = compute_stats(latencies, 0.99, 1_000_000_000, 0);
        assert!(
            (1989..=1991).contains(&stats.target_percentile_ns),
            "p99 {} outside [1989, 1991]",
            stats.target_percentile_ns
        );
        assert_eq!(stats.sample_count, 1_000_000);
        assert_eq!(stats.qps, 1_000_000.0);
    }

    #[test]
    fn stats_cover_min_max_mean() {
        let stats = compute_stats(vec![30, 10, 20], 0.90, 3_000_000_000, 0);
        assert_eq!(stats.min_ns, 10);
        assert_eq!(stats.max_ns, 30);
        assert_eq!(stats.mean_ns, 20);
        assert_eq!(stats.p50_ns, 20);
        assert_eq!(stats.qps, 1.0);
    }

    #[test]
    fn zero_issue_span_falls_back_to_completion_span() {
        let stats = compute_stats(vec![5; 1000], 0.90, 0, 100_000_000);
        assert_eq!(stats.qps, 10_000.0);
    }

    #[test]
    fn recorder_keeps_every_sample_across_threads() {
        let recorder = Arc::new(LatencyRecorder::with_expected_samples(64_000));
        let writers: Vec<_> = (0..8u64)
            .map(|t| {
                let recorder = recorder.clone();
                thread::spawn(move || {
                    for i in 0..8_000u64 {
                        recorder.record(t * 8_000 + i, (t * 8_000 + i) as i64);
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().expect("join");
        }

        let mut merged = recorder.drain();
        merged.sort_unstable();
        assert_eq!(merged.len(), 64_000);
        assert_eq!(merged[0], 0);
        assert_eq!(merged[63_999], 63_999);
    }

    #[test]
    fn evaluate_fails_latency_bound_scenarios_on_slow_percentile() {
        let mut requested = RequestedSettings::new(Scenario::Server, Mode::PerformanceOnly);
        requested.server_target_latency = Duration::from_millis(10);
        requested.min_query_count = 1;
        requested.min_duration = Duration::from_nanos(1);
        let (settings, _) = resolve(&requested, 64).expect("resolve");

        let stats = LatencyStats {
            sample_count: 100,
            target_percentile_ns: 20_000_000,
            ..LatencyStats::default()
        };
        let (valid, reasons) = evaluate(&settings, &stats, 100, 1_000_000_000);
        assert!(!valid);
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("percentile latency"));
    }

    #[test]
    fn evaluate_judges_offline_on_throughput() {
        let mut requested = RequestedSettings::new(Scenario::Offline, Mode::PerformanceOnly);
        requested.offline_expected_qps = 10_000.0;
        requested.min_duration = Duration::from_millis(1);
        requested.min_query_count = 1;
        let (settings, _) = resolve(&requested, 64).expect("resolve");

        let mut stats = LatencyStats {
            sample_count: settings.min_sample_count,
            qps: 12_000.0,
            ..LatencyStats::default()
        };
        let (valid, _) = evaluate(&settings, &stats, 1, 0);
        assert!(valid);

        stats.qps = 9_000.0;
        let (valid, reasons) = evaluate(&settings, &stats, 1, 0);
        assert!(!valid);
        assert!(reasons[0].contains("below target"));
    }

    #[test]
    fn evaluate_requires_minimum_duration_and_counts() {
        let mut requested = RequestedSettings::new(Scenario::Server, Mode::PerformanceOnly);
        requested.min_duration = Duration::from_secs(10);
        requested.min_query_count = 100;
        let (settings, _) = resolve(&requested, 64).expect("resolve");

        let stats = LatencyStats {
            sample_count: 50,
            ..LatencyStats::default()
        };
        let (valid, reasons) = evaluate(&settings, &stats, 50, 1_000_000_000);
        assert!(!valid);
        assert_eq!(reasons.len(), 3);
    }
}
