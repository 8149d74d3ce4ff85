// SPDX-License-Identifier: Apache-2.0

//! Run orchestration: the issue scheduler and the lifecycle around it.
//!
//! [`run`] drives one complete benchmark run: initial sample load, warmup,
//! the scenario-specific issue loop, draining, and finalization. Issuance
//! happens on a dedicated scheduler thread that never allocates query
//! records (they live in the pre-sized ring) and sleeps only on the
//! monotonic clock or on the status board's condvar.

use crate::clock::Clock;
use crate::collector::{Collector, CompletionHandle};
use crate::error::Error;
use crate::loader::SampleLoader;
use crate::recorder::{LatencyRecorder, compute_stats, evaluate};
use crate::ring::{QueryRing, pack_sample_id};
use crate::state::{RunState, StatusBoard};
use crate::{QuerySample, QuerySampleLibrary, SystemUnderTest};
use loadgen_config::{EffectiveSettings, Mode, Scenario};
use loadgen_reporting::event::LogEvent;
use loadgen_reporting::{LogHandle, PerformanceSummary};
use loadgen_schedule::{LoadableSets, Schedule, generate_schedule};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Per-run knobs that are not part of the benchmark plan itself.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Emit a detail event for every issued and completed query.
    pub log_queries: bool,
    /// Overrides the computed drain grace window.
    pub drain_grace: Option<Duration>,
}

/// Everything a finished run produces.
#[derive(Debug)]
pub struct RunOutcome {
    /// Terminal lifecycle state: DONE, or ABORTED after a fatal error.
    pub state: RunState,
    /// The reporter's input: statistics and the pass/fail verdict.
    pub summary: PerformanceSummary,
    /// Measured per-sample latencies in completion order.
    pub latencies: Vec<i64>,
}

struct IssueReport {
    t0_ns: i64,
    first_issue_ns: i64,
    last_issue_ns: i64,
    drain_entry_ns: i64,
    measured_issued: u64,
}

/// Drives one complete run of the configured scenario against the SUT.
pub fn run(
    sut: Arc<dyn SystemUnderTest>,
    qsl: Arc<dyn QuerySampleLibrary>,
    settings: &EffectiveSettings,
    log: &LogHandle,
    options: &RunOptions,
) -> Result<RunOutcome, Error> {
    let sets = Arc::new(LoadableSets::generate(settings, qsl.total_sample_count()));
    let schedule = generate_schedule(settings, &sets);
    debug!(
        queries = schedule.len(),
        samples = schedule.total_samples(),
        "schedule generated"
    );

    let clock = Clock::new();
    let status = Arc::new(StatusBoard::new());
    let ring_capacity = if settings.unbounded_async_queries() {
        schedule.len() + 2
    } else {
        settings.max_async_queries as usize * 2 + 16
    };
    let collector = Arc::new(Collector::new(
        clock,
        QueryRing::with_capacity(ring_capacity),
        LatencyRecorder::with_expected_samples(schedule.total_samples()),
        status.clone(),
        log.clone(),
        options.log_queries,
    ));

    log.lifecycle(RunState::Init.label(), clock.now_ns());
    let loader = SampleLoader::spawn(qsl, sets.clone())?;
    if !sets.is_empty() {
        loader.rotate_to(0)?;
    }
    clock.prewarm();

    let grace = options.drain_grace.unwrap_or_else(|| grace_window(settings));
    let scheduler = {
        let settings = settings.clone();
        let sut = sut.clone();
        let collector = collector.clone();
        let status = status.clone();
        let log = log.clone();
        thread::Builder::new()
            .name("issue-scheduler".to_owned())
            .spawn(move || {
                scheduler_loop(&schedule, &settings, &sut, &collector, &status, &log, loader, grace)
            })
            .map_err(|e| Error::ThreadSpawnError {
                thread_name: "issue-scheduler".to_owned(),
                source: e,
            })?
    };
    let report = scheduler.join().map_err(|panic| Error::ThreadJoinPanic {
        thread_name: "issue-scheduler".to_owned(),
        panic_message: format!("{panic:?}"),
    })??;

    finalize(&sut, settings, &status, &collector, log, &report)
}

fn finalize(
    sut: &Arc<dyn SystemUnderTest>,
    settings: &EffectiveSettings,
    status: &StatusBoard,
    collector: &Collector,
    log: &LogHandle,
    report: &IssueReport,
) -> Result<RunOutcome, Error> {
    let aborted = status.aborted();
    let latencies = collector.recorder.drain();

    let issue_span_ns = report.last_issue_ns - report.first_issue_ns;
    let completion_span_ns = collector.last_measured_completion_ns() - report.first_issue_ns;
    let stats = compute_stats(
        latencies.clone(),
        settings.target_latency_percentile,
        issue_span_ns,
        completion_span_ns,
    );

    let measured_duration_ns = report.drain_entry_ns - report.t0_ns;
    // Accuracy runs are judged on completeness, not on latency objectives.
    let (mut valid, mut invalid_reasons) = if settings.mode == Mode::AccuracyOnly {
        (true, Vec::new())
    } else {
        evaluate(settings, &stats, report.measured_issued, measured_duration_ns)
    };
    if aborted {
        valid = false;
        invalid_reasons.push("run aborted before all queries were accounted for".to_owned());
    }

    sut.report_latency_results(&latencies);

    let terminal = if aborted { RunState::Aborted } else { RunState::Done };
    status.set_state(terminal);
    log.lifecycle(terminal.label(), collector.clock().now_ns());

    let queries_completed = report.measured_issued.saturating_sub(status.outstanding());
    Ok(RunOutcome {
        state: terminal,
        summary: PerformanceSummary {
            scenario: settings.scenario,
            mode: settings.mode,
            stats,
            queries_issued: report.measured_issued,
            queries_completed,
            valid,
            invalid_reasons,
            aborted,
        },
        latencies,
    })
}

struct Issuer<'a> {
    sut: &'a Arc<dyn SystemUnderTest>,
    collector: &'a Arc<Collector>,
    status: &'a Arc<StatusBoard>,
    log: &'a LogHandle,
    clock: Clock,
    log_queries: bool,
    next_query_id: u64,
    first_issue_ns: Option<i64>,
    last_issue_ns: i64,
}

impl Issuer<'_> {
    /// Publishes the record and hands the query to the SUT. Returns false
    /// when publication failed fatally and the run is aborting.
    fn issue(
        &mut self,
        sample_indices: &[u64],
        scheduled_ns: i64,
        measured: bool,
        accuracy_log: bool,
    ) -> bool {
        let query_id = self.next_query_id;
        self.next_query_id += 1;

        let accuracy_indices = accuracy_log.then_some(sample_indices);
        self.status.on_issue();
        let t_issue_ns = self.clock.now_ns();
        if let Err(error) = self.collector.ring.publish(
            query_id,
            scheduled_ns,
            t_issue_ns,
            sample_indices.len() as u64,
            measured,
            accuracy_indices,
        ) {
            self.log.fatal(error.to_string());
            self.status.abort();
            return false;
        }
        if self.log_queries {
            self.log.log(LogEvent::QueryIssued {
                query_id,
                scheduled_ns,
                actual_ns: t_issue_ns,
                sample_count: sample_indices.len() as u64,
            });
        }
        if measured {
            if self.first_issue_ns.is_none() {
                self.first_issue_ns = Some(t_issue_ns);
            }
            self.last_issue_ns = t_issue_ns;
        }

        let samples: Vec<QuerySample> = sample_indices
            .iter()
            .enumerate()
            .map(|(position, &index)| QuerySample {
                id: pack_sample_id(query_id, position as u64),
                index,
            })
            .collect();
        self.sut
            .issue_query(samples, CompletionHandle::new(Arc::clone(self.collector)));
        true
    }
}

/// Grace window for blocking waits on outstanding queries.
fn grace_window(settings: &EffectiveSettings) -> Duration {
    (settings.target_latency * 10)
        .max(settings.min_duration)
        .max(Duration::from_secs(10))
}

#[allow(clippy::too_many_arguments)]
fn scheduler_loop(
    schedule: &Schedule,
    settings: &EffectiveSettings,
    sut: &Arc<dyn SystemUnderTest>,
    collector: &Arc<Collector>,
    status: &Arc<StatusBoard>,
    log: &LogHandle,
    loader: SampleLoader,
    grace: Duration,
) -> Result<IssueReport, Error> {
    // The collector and scheduler share one clock anchor.
    let clock = collector.clock();
    let accuracy_mode = settings.mode == Mode::AccuracyOnly;
    let mut issuer = Issuer {
        sut,
        collector,
        status,
        log,
        clock,
        log_queries: collector.log_queries(),
        next_query_id: 0,
        first_issue_ns: None,
        last_issue_ns: 0,
    };

    // WARMUP: one throwaway query, skipped in accuracy mode.
    status.set_state(RunState::Warmup);
    log.lifecycle(RunState::Warmup.label(), clock.now_ns());
    if !accuracy_mode {
        if let Some(first) = schedule.queries().first() {
            // Offline's only entry is the whole coalesced workload; warm up
            // with a single-sample probe so it is not served twice.
            let probe = if settings.scenario == Scenario::Offline {
                &first.sample_indices[..first.sample_indices.len().min(1)]
            } else {
                &first.sample_indices[..]
            };
            if issuer.issue(probe, 0, false, false)
                && !status.wait_idle_until(Some(Instant::now() + grace))
            {
                log.fatal("warmup query did not complete within the grace window");
                status.abort();
            }
        }
    }

    // MEASURING.
    let t0_ns = clock.now_ns();
    status.set_state(RunState::Measuring);
    log.lifecycle(RunState::Measuring.label(), t0_ns);

    let max_duration_ns = settings.max_duration.as_nanos() as i64;
    let target_duration_ns = settings.target_duration.as_nanos() as i64;
    let mut measured_issued = 0u64;
    let mut current_set = 0usize;
    let mut out_of_queries = false;
    let mut index = 0usize;

    'issue: while !status.aborted() {
        let Some(entry) = schedule.queries().get(index) else {
            let elapsed_ns = clock.now_ns() - t0_ns;
            out_of_queries = !accuracy_mode
                && !(measured_issued >= settings.min_query_count
                    && elapsed_ns >= target_duration_ns);
            break;
        };

        if accuracy_mode {
            // Queries referencing the outgoing set must land before the
            // library may unload it.
            if entry.set_index != current_set {
                if !status.wait_idle_until(Some(Instant::now() + grace)) {
                    log.fatal("in-flight queries stalled across a sample-set rotation");
                    status.abort();
                    break;
                }
                loader.rotate_to(entry.set_index)?;
                current_set = entry.set_index;
            }
        }

        match settings.scenario {
            Scenario::SingleStream | Scenario::Offline => {}
            Scenario::MultiStream | Scenario::Server => {
                clock.sleep_until(t0_ns + entry.scheduled_delta_ns);
            }
            Scenario::MultiStreamFree => {
                clock.sleep_until(t0_ns + entry.scheduled_delta_ns);
                if !settings.unbounded_async_queries()
                    && !status.wait_slot_below(settings.max_async_queries as u64)
                {
                    break;
                }
            }
        }
        if status.aborted() {
            break;
        }

        // Termination is decided after pacing: a query whose slot lands on
        // the duration boundary is rejected, not issued.
        if !accuracy_mode {
            let elapsed_ns = clock.now_ns() - t0_ns;
            if max_duration_ns > 0 && elapsed_ns >= max_duration_ns {
                break;
            }
            if settings.max_query_count > 0 && measured_issued >= settings.max_query_count {
                break;
            }
            if measured_issued >= settings.min_query_count && elapsed_ns >= target_duration_ns {
                break;
            }
        }

        if settings.scenario == Scenario::MultiStream && !settings.unbounded_async_queries() {
            let limit = settings.max_async_queries as u64;
            if accuracy_mode {
                // Every sample must be issued; waiting beats dropping here.
                if !status.wait_slot_below(limit) {
                    break;
                }
            } else {
                let outstanding = status.outstanding();
                if outstanding >= limit {
                    // Drop the frame rather than distort the timeline.
                    log.error(format!(
                        "dropped frame: query scheduled at {} ns with {outstanding} queries outstanding",
                        entry.scheduled_delta_ns
                    ));
                    index += 1;
                    continue 'issue;
                }
            }
        }

        // Server coalescing folds queries whose slot already passed into
        // this issue.
        let mut merged: Vec<u64>;
        let mut sample_indices: &[u64] = &entry.sample_indices;
        let mut accuracy_log = entry.accuracy_log || accuracy_mode;
        let scheduled_ns = entry.scheduled_delta_ns;
        index += 1;
        if settings.scenario == Scenario::Server && settings.server_coalesce_queries {
            let now_rel_ns = clock.now_ns() - t0_ns;
            let mut overdue = 0usize;
            while let Some(next) = schedule.queries().get(index + overdue) {
                if next.scheduled_delta_ns > now_rel_ns {
                    break;
                }
                overdue += 1;
            }
            if overdue > 0 {
                merged = entry.sample_indices.clone();
                for next in &schedule.queries()[index..index + overdue] {
                    merged.extend_from_slice(&next.sample_indices);
                    accuracy_log |= next.accuracy_log;
                }
                index += overdue;
                sample_indices = &merged;
            }
        }

        if !issuer.issue(sample_indices, scheduled_ns, true, accuracy_log) {
            break;
        }
        measured_issued += 1;

        if settings.scenario == Scenario::SingleStream
            && !status.wait_idle_until(Some(Instant::now() + grace))
        {
            log.fatal("query did not complete within the grace window");
            status.abort();
            break;
        }
    }

    if out_of_queries {
        log.error(
            "Ran out of generated queries to issue before the minimum duration \
             and query count were reached",
        );
    }

    // DRAINING.
    let drain_entry_ns = clock.now_ns();
    status.set_state(RunState::Draining);
    log.lifecycle(RunState::Draining.label(), drain_entry_ns);
    sut.flush_queries();
    if !status.wait_idle_until(Some(Instant::now() + grace)) {
        log.fatal(format!(
            "{} queries still outstanding after the {}s drain grace window",
            status.outstanding(),
            grace.as_secs()
        ));
        status.abort();
    }
    loader.shutdown()?;

    Ok(IssueReport {
        t0_ns,
        first_issue_ns: issuer.first_issue_ns.unwrap_or(t0_ns),
        last_issue_ns: issuer.last_issue_ns.max(issuer.first_issue_ns.unwrap_or(t0_ns)),
        drain_entry_ns,
        measured_issued,
    })
}
