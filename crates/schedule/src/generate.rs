// SPDX-License-Identifier: Apache-2.0

//! Schedule generation: per-query sample indices and scheduled issue times.

use crate::sets::LoadableSets;
use loadgen_config::{EffectiveSettings, Mode, Scenario};
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp};
use rand_pcg::Pcg64;

/// One planned query: which samples it carries and when it should issue,
/// as a nanosecond offset from the start of measurement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledQuery {
    /// Library sample indices, in issue order.
    pub sample_indices: Vec<u64>,
    /// Scheduled issue time, nanoseconds after measurement starts.
    pub scheduled_delta_ns: i64,
    /// Loadable set this query draws from.
    pub set_index: usize,
    /// Whether this query's responses are copied to the accuracy log.
    pub accuracy_log: bool,
}

/// A finite, regenerable view of the query stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    queries: Vec<ScheduledQuery>,
}

impl Schedule {
    /// The planned queries in issue order.
    #[must_use]
    pub fn queries(&self) -> &[ScheduledQuery] {
        &self.queries
    }

    /// Number of planned queries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    /// True when nothing was planned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// Total number of samples across all planned queries.
    #[must_use]
    pub fn total_samples(&self) -> u64 {
        self.queries.iter().map(|q| q.sample_indices.len() as u64).sum()
    }
}

/// Generates the full schedule for this run.
///
/// Deterministic: the output is a pure function of the settings (including
/// seeds) and the loadable sets, which are themselves derived from the
/// settings and the library size.
#[must_use]
pub fn generate_schedule(settings: &EffectiveSettings, sets: &LoadableSets) -> Schedule {
    let mut generator = Generator::new(settings);
    let queries = if settings.mode == Mode::AccuracyOnly {
        generator.accuracy_queries(sets)
    } else {
        generator.performance_queries(sets.set(0))
    };
    Schedule { queries }
}

struct Generator<'a> {
    settings: &'a EffectiveSettings,
    sample_rng: Pcg64,
    schedule_rng: Pcg64,
    accuracy_rng: Pcg64,
    arrival: Option<Exp<f64>>,
    elapsed_s: f64,
    issued: u64,
    scratch: Vec<u64>,
    swaps: Vec<usize>,
}

impl<'a> Generator<'a> {
    fn new(settings: &'a EffectiveSettings) -> Self {
        let arrival = match settings.scenario {
            // target_qps is validated positive at resolution.
            Scenario::Server => Exp::new(settings.target_qps).ok(),
            _ => None,
        };
        Generator {
            settings,
            sample_rng: Pcg64::seed_from_u64(settings.sample_index_rng_seed),
            schedule_rng: Pcg64::seed_from_u64(settings.schedule_rng_seed),
            accuracy_rng: Pcg64::seed_from_u64(settings.accuracy_log_rng_seed),
            arrival,
            elapsed_s: 0.0,
            issued: 0,
            scratch: Vec::new(),
            swaps: Vec::new(),
        }
    }

    /// The scheduled delta of the next query, consuming jitter draws for
    /// Server. Monotonic across calls, also across loadable-set boundaries.
    fn next_delta_ns(&mut self) -> i64 {
        let k = self.issued;
        self.issued += 1;
        match self.settings.scenario {
            Scenario::SingleStream | Scenario::Offline => 0,
            Scenario::MultiStream | Scenario::MultiStreamFree => {
                (k as f64 * 1e9 / self.settings.target_qps) as i64
            }
            Scenario::Server => {
                if let Some(arrival) = &self.arrival {
                    self.elapsed_s += arrival.sample(&mut self.schedule_rng);
                }
                (self.elapsed_s * 1e9) as i64
            }
        }
    }

    fn accuracy_flag(&mut self) -> bool {
        // One draw per query keeps the stream aligned whatever the outcome.
        let coin: f64 = self.accuracy_rng.random();
        coin < self.settings.accuracy_log_probability
    }

    /// Draws `count` sample indices from `loaded`: without replacement when
    /// the working set is large enough, with replacement otherwise (the
    /// coalesced Offline query is usually larger than the working set).
    fn draw_samples(&mut self, loaded: &[u64], count: usize) -> Vec<u64> {
        let n = loaded.len();
        if count > n {
            return (0..count)
                .map(|_| loaded[self.sample_rng.random_range(0..n)])
                .collect();
        }
        if self.scratch.len() != n {
            self.scratch.clear();
            self.scratch.extend_from_slice(loaded);
        }
        self.swaps.clear();
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            let j = self.sample_rng.random_range(i..n);
            self.scratch.swap(i, j);
            self.swaps.push(j);
            out.push(self.scratch[i]);
        }
        // Undo the swaps so every query draws from the same loaded order.
        for (i, &j) in self.swaps.iter().enumerate().rev() {
            self.scratch.swap(i, j);
        }
        out
    }

    fn performance_queries(&mut self, loaded: &[u64]) -> Vec<ScheduledQuery> {
        let spq = self.settings.samples_per_query as usize;

        if self.settings.performance_issue_unique {
            // Each query takes a distinct contiguous block of the loaded
            // set; together they issue every loaded sample exactly once.
            let mut queries = Vec::with_capacity(loaded.len().div_ceil(spq.max(1)));
            for chunk in loaded.chunks(spq.max(1)) {
                let scheduled_delta_ns = self.next_delta_ns();
                let accuracy_log = self.accuracy_flag();
                queries.push(ScheduledQuery {
                    sample_indices: chunk.to_vec(),
                    scheduled_delta_ns,
                    set_index: 0,
                    accuracy_log,
                });
            }
            return queries;
        }

        let planned = self.planned_query_count();
        let mut queries = Vec::with_capacity(planned.unwrap_or(1024));
        loop {
            if let Some(count) = planned {
                if queries.len() >= count {
                    break;
                }
            } else if self.server_horizon_reached(&queries) {
                break;
            }
            let scheduled_delta_ns = self.next_delta_ns();
            let sample_indices = if self.settings.performance_issue_same {
                let fixed = loaded[self.settings.performance_issue_same_index as usize];
                vec![fixed; spq]
            } else {
                self.draw_samples(loaded, spq)
            };
            let accuracy_log = self.accuracy_flag();
            queries.push(ScheduledQuery {
                sample_indices,
                scheduled_delta_ns,
                set_index: 0,
                accuracy_log,
            });
        }
        queries
    }

    /// Closed-form query count for the deterministic scenarios; `None` for
    /// Server, whose count emerges from the jitter draws.
    fn planned_query_count(&self) -> Option<usize> {
        let s = self.settings;
        let by_duration = (s.target_duration.as_secs_f64() * s.target_qps).ceil() as u64;
        let count = match s.scenario {
            Scenario::Offline => 1,
            Scenario::SingleStream => s.min_query_count.max(by_duration),
            Scenario::MultiStream | Scenario::MultiStreamFree => {
                // One past the horizon: the issue loop decides at the
                // boundary whether that query still runs.
                s.min_query_count.max(by_duration) + 1
            }
            Scenario::Server => return None,
        };
        let capped = if s.max_query_count > 0 {
            count.min(s.max_query_count)
        } else {
            count
        };
        Some(capped.max(1) as usize)
    }

    fn server_horizon_reached(&self, queries: &[ScheduledQuery]) -> bool {
        let s = self.settings;
        if s.max_query_count > 0 && queries.len() as u64 >= s.max_query_count {
            return true;
        }
        if (queries.len() as u64) < s.min_query_count {
            return false;
        }
        match queries.last() {
            Some(last) => last.scheduled_delta_ns >= s.target_duration.as_nanos() as i64,
            None => false,
        }
    }

    fn accuracy_queries(&mut self, sets: &LoadableSets) -> Vec<ScheduledQuery> {
        let spq = self.settings.samples_per_query as usize;
        let mut queries = Vec::new();
        for set_index in 0..sets.len() {
            let set = sets.set(set_index);
            match self.settings.scenario {
                // One coalesced query per loadable set.
                Scenario::Offline => {
                    let scheduled_delta_ns = self.next_delta_ns();
                    queries.push(ScheduledQuery {
                        sample_indices: set.to_vec(),
                        scheduled_delta_ns,
                        set_index,
                        accuracy_log: true,
                    });
                }
                _ => {
                    for chunk in set.chunks(spq.max(1)) {
                        let scheduled_delta_ns = self.next_delta_ns();
                        queries.push(ScheduledQuery {
                            sample_indices: chunk.to_vec(),
                            scheduled_delta_ns,
                            set_index,
                            accuracy_log: true,
                        });
                    }
                }
            }
        }
        queries
    }
}
