// SPDX-License-Identifier: Apache-2.0

//! End-to-end scenario runs against a mock SUT.
//!
//! Durations are scaled down from production configurations so the whole
//! suite stays fast; the properties exercised are the same.

use bytes::Bytes;
use loadgen_config::{Mode, RequestedSettings, Scenario, resolve};
use loadgen_engine::{
    CompletionHandle, QuerySample, QuerySampleLibrary, QuerySampleResponse, RunOptions, RunState,
    SystemUnderTest, run,
};
use loadgen_reporting::Logger;
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

/// Sample library that only counts calls; the engine never dereferences
/// sample data.
struct NullLibrary {
    total: u64,
    performance: u64,
    loads: Mutex<Vec<Vec<u64>>>,
    unloads: Mutex<Vec<Vec<u64>>>,
}

impl NullLibrary {
    fn new(total: u64, performance: u64) -> Arc<Self> {
        Arc::new(NullLibrary {
            total,
            performance,
            loads: Mutex::new(Vec::new()),
            unloads: Mutex::new(Vec::new()),
        })
    }
}

impl QuerySampleLibrary for NullLibrary {
    fn name(&self) -> &str {
        "null-library"
    }

    fn total_sample_count(&self) -> u64 {
        self.total
    }

    fn performance_sample_count(&self) -> u64 {
        self.performance
    }

    fn load_samples_to_ram(&self, indices: &[u64]) {
        self.loads.lock().push(indices.to_vec());
    }

    fn unload_samples_from_ram(&self, indices: &[u64]) {
        self.unloads.lock().push(indices.to_vec());
    }
}

enum Behavior {
    /// Spin for `latency`, then complete on the issuing thread.
    Immediate { latency: Duration },
    /// Complete from a worker pool after `latency`.
    Deferred { latency: Duration },
    /// Complete with an id the engine never handed out.
    BogusId,
    /// Never complete anything.
    Silent,
}

struct MockSut {
    behavior: Behavior,
    issued: Mutex<Vec<Vec<u64>>>,
    reported: Mutex<Vec<i64>>,
    jobs: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

struct Job {
    due: Instant,
    responses: Vec<QuerySampleResponse>,
    completer: CompletionHandle,
}

fn spin_until(due: Instant) {
    let coarse = due
        .checked_duration_since(Instant::now())
        .unwrap_or_default()
        .saturating_sub(Duration::from_micros(300));
    if !coarse.is_zero() {
        thread::sleep(coarse);
    }
    while Instant::now() < due {
        std::hint::spin_loop();
    }
}

impl MockSut {
    fn new(behavior: Behavior) -> Arc<Self> {
        let sut = Arc::new(MockSut {
            behavior,
            issued: Mutex::new(Vec::new()),
            reported: Mutex::new(Vec::new()),
            jobs: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        });
        if matches!(sut.behavior, Behavior::Deferred { .. }) {
            let (tx, rx) = mpsc::channel::<Job>();
            let rx = Arc::new(Mutex::new(rx));
            let mut workers = sut.workers.lock();
            for _ in 0..8 {
                let rx = rx.clone();
                workers.push(thread::spawn(move || {
                    loop {
                        let job = rx.lock().recv();
                        match job {
                            Ok(job) => {
                                spin_until(job.due);
                                job.completer.query_samples_complete(&job.responses);
                            }
                            Err(_) => break,
                        }
                    }
                }));
            }
            *sut.jobs.lock() = Some(tx);
        }
        sut
    }

    fn issued_indices(&self) -> Vec<Vec<u64>> {
        self.issued.lock().clone()
    }

    fn reported_latencies(&self) -> Vec<i64> {
        self.reported.lock().clone()
    }
}

impl Drop for MockSut {
    fn drop(&mut self) {
        let _ = self.jobs.lock().take();
        for worker in self.workers.lock().drain(..) {
            let _ = worker.join();
        }
    }
}

fn responses_for(samples: &[QuerySample]) -> Vec<QuerySampleResponse> {
    samples
        .iter()
        .map(|s| QuerySampleResponse {
            id: s.id,
            data: Bytes::from(s.index.to_le_bytes().to_vec()),
        })
        .collect()
}

impl SystemUnderTest for MockSut {
    fn name(&self) -> &str {
        "mock-sut"
    }

    fn issue_query(&self, samples: Vec<QuerySample>, completer: CompletionHandle) {
        self.issued.lock().push(samples.iter().map(|s| s.index).collect());
        match &self.behavior {
            Behavior::Immediate { latency } => {
                spin_until(Instant::now() + *latency);
                completer.query_samples_complete(&responses_for(&samples));
            }
            Behavior::Deferred { latency } => {
                let job = Job {
                    due: Instant::now() + *latency,
                    responses: responses_for(&samples),
                    completer,
                };
                if let Some(tx) = self.jobs.lock().as_ref() {
                    tx.send(job).expect("worker pool alive");
                }
            }
            Behavior::BogusId => {
                completer.query_samples_complete(&[QuerySampleResponse {
                    id: u64::MAX - 1,
                    data: Bytes::new(),
                }]);
            }
            Behavior::Silent => {}
        }
    }

    fn flush_queries(&self) {}

    fn report_latency_results(&self, latencies_ns: &[i64]) {
        *self.reported.lock() = latencies_ns.to_vec();
    }
}

/// A `Write` that appends into shared memory for log inspection.
#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().clone()).expect("utf8")
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn quick_options() -> RunOptions {
    RunOptions {
        log_queries: false,
        drain_grace: Some(Duration::from_secs(2)),
    }
}

#[test]
fn single_stream_constant_latency_passes() {
    let mut requested = RequestedSettings::new(Scenario::SingleStream, Mode::PerformanceOnly);
    requested.single_stream_expected_latency = Duration::from_millis(2);
    requested.min_duration = Duration::from_millis(100);
    requested.min_query_count = 220;
    let (settings, _) = resolve(&requested, 64).expect("resolve");

    let sut = MockSut::new(Behavior::Immediate {
        latency: Duration::from_micros(500),
    });
    let qsl = NullLibrary::new(64, 64);
    let logger = Logger::spawn(Box::new(std::io::sink()), None).expect("logger");

    let outcome = run(sut.clone(), qsl, &settings, &logger.handle(), &quick_options())
        .expect("run");
    logger.finish().expect("finish");

    assert_eq!(outcome.state, RunState::Done);
    assert!(outcome.summary.valid, "reasons: {:?}", outcome.summary.invalid_reasons);
    assert_eq!(outcome.summary.queries_issued, 220);
    let p = outcome.summary.stats.target_percentile_ns;
    assert!(
        (500_000..1_500_000).contains(&p),
        "observed percentile {p} ns far from the injected 500us"
    );
    assert_eq!(sut.reported_latencies().len(), 220);
}

#[test]
fn server_meets_latency_target_and_passes() {
    let mut requested = RequestedSettings::new(Scenario::Server, Mode::PerformanceOnly);
    requested.server_target_qps = 400.0;
    requested.server_target_latency = Duration::from_millis(25);
    requested.min_duration = Duration::from_millis(250);
    requested.min_query_count = 50;
    let (settings, _) = resolve(&requested, 64).expect("resolve");

    let sut = MockSut::new(Behavior::Deferred {
        latency: Duration::from_millis(5),
    });
    let qsl = NullLibrary::new(64, 64);
    let logger = Logger::spawn(Box::new(std::io::sink()), None).expect("logger");

    let outcome = run(sut, qsl, &settings, &logger.handle(), &quick_options()).expect("run");
    logger.finish().expect("finish");

    assert_eq!(outcome.state, RunState::Done);
    assert!(outcome.summary.valid, "reasons: {:?}", outcome.summary.invalid_reasons);
    assert!(outcome.summary.stats.sample_count >= 50);
    assert!(outcome.summary.stats.target_percentile_ns < 25_000_000);
    assert!(outcome.summary.stats.target_percentile_ns >= 5_000_000);
}

#[test]
fn server_with_slow_sut_fails_the_latency_target() {
    let mut requested = RequestedSettings::new(Scenario::Server, Mode::PerformanceOnly);
    requested.server_target_qps = 200.0;
    requested.server_target_latency = Duration::from_millis(10);
    requested.min_duration = Duration::from_millis(150);
    requested.min_query_count = 20;
    let (settings, _) = resolve(&requested, 64).expect("resolve");

    let sut = MockSut::new(Behavior::Deferred {
        latency: Duration::from_millis(30),
    });
    let qsl = NullLibrary::new(64, 64);
    let logger = Logger::spawn(Box::new(std::io::sink()), None).expect("logger");

    let outcome = run(sut, qsl, &settings, &logger.handle(), &quick_options()).expect("run");
    logger.finish().expect("finish");

    assert_eq!(outcome.state, RunState::Done);
    assert!(!outcome.summary.valid);
    assert!(outcome.summary.stats.target_percentile_ns > 10_000_000);
    assert!(
        outcome
            .summary
            .invalid_reasons
            .iter()
            .any(|r| r.contains("percentile latency"))
    );
}

#[test]
fn offline_runs_one_coalesced_query_and_passes_on_throughput() {
    let mut requested = RequestedSettings::new(Scenario::Offline, Mode::PerformanceOnly);
    requested.offline_expected_qps = 1000.0;
    requested.min_duration = Duration::from_millis(100);
    requested.min_query_count = 1;
    let (settings, _) = resolve(&requested, 64).expect("resolve");
    assert_eq!(settings.samples_per_query, 110);

    let sut = MockSut::new(Behavior::Immediate {
        latency: Duration::from_micros(50),
    });
    let qsl = NullLibrary::new(64, 64);
    let logger = Logger::spawn(Box::new(std::io::sink()), None).expect("logger");

    let outcome = run(sut.clone(), qsl, &settings, &logger.handle(), &quick_options()).expect("run");
    logger.finish().expect("finish");

    assert_eq!(outcome.state, RunState::Done);
    assert_eq!(outcome.summary.queries_issued, 1);
    assert_eq!(outcome.summary.stats.sample_count, 110);
    assert!(outcome.summary.valid, "reasons: {:?}", outcome.summary.invalid_reasons);
    assert!(outcome.summary.stats.qps >= 1000.0);

    // Warmup probes with one sample; the coalesced workload is served once.
    let issued = sut.issued_indices();
    assert_eq!(issued.len(), 2);
    assert_eq!(issued[0].len(), 1);
    assert_eq!(issued[1].len(), 110);
}

#[test]
fn multi_stream_issues_exactly_the_periodic_count() {
    let mut requested = RequestedSettings::new(Scenario::MultiStream, Mode::PerformanceOnly);
    requested.multi_stream_target_qps = 100.0;
    requested.multi_stream_samples_per_query = 4;
    requested.multi_stream_max_async_queries = 2;
    requested.min_duration = Duration::from_millis(200);
    requested.min_query_count = 1;
    let (settings, _) = resolve(&requested, 64).expect("resolve");

    let sut = MockSut::new(Behavior::Immediate {
        latency: Duration::from_micros(100),
    });
    let qsl = NullLibrary::new(64, 64);
    let logger = Logger::spawn(Box::new(std::io::sink()), None).expect("logger");

    let outcome = run(sut, qsl, &settings, &logger.handle(), &quick_options()).expect("run");
    logger.finish().expect("finish");

    assert_eq!(outcome.state, RunState::Done);
    assert_eq!(outcome.summary.queries_issued, 20);
    assert_eq!(outcome.summary.stats.sample_count, 80);
}

#[test]
fn multi_stream_saturated_scheduler_drops_frames() {
    let mut requested = RequestedSettings::new(Scenario::MultiStream, Mode::PerformanceOnly);
    requested.multi_stream_target_qps = 200.0;
    requested.multi_stream_samples_per_query = 1;
    requested.multi_stream_max_async_queries = 1;
    requested.min_duration = Duration::from_millis(200);
    requested.min_query_count = 1;
    let (settings, _) = resolve(&requested, 64).expect("resolve");

    let sut = MockSut::new(Behavior::Deferred {
        latency: Duration::from_millis(40),
    });
    let qsl = NullLibrary::new(64, 64);
    let sink = SharedSink::default();
    let logger = Logger::spawn(Box::new(sink.clone()), None).expect("logger");

    let outcome = run(sut, qsl, &settings, &logger.handle(), &quick_options()).expect("run");
    logger.finish().expect("finish");

    assert_eq!(outcome.state, RunState::Done);
    // 40 frame slots in 200ms; at most ~6 can complete in time.
    assert!(outcome.summary.queries_issued < 10);
    assert!(sink.contents().contains("dropped frame"));
}

#[test]
fn multi_stream_free_paces_on_completions_and_fails_throughput() {
    let mut requested = RequestedSettings::new(Scenario::MultiStreamFree, Mode::PerformanceOnly);
    requested.multi_stream_target_qps = 1000.0;
    requested.multi_stream_samples_per_query = 1;
    requested.multi_stream_max_async_queries = 2;
    requested.min_duration = Duration::from_millis(150);
    requested.min_query_count = 1;
    let (settings, _) = resolve(&requested, 64).expect("resolve");

    let sut = MockSut::new(Behavior::Deferred {
        latency: Duration::from_millis(10),
    });
    let qsl = NullLibrary::new(64, 64);
    let logger = Logger::spawn(Box::new(std::io::sink()), None).expect("logger");

    let outcome = run(sut, qsl, &settings, &logger.handle(), &quick_options()).expect("run");
    logger.finish().expect("finish");

    assert_eq!(outcome.state, RunState::Done);
    // Two slots limited by a 10ms service time cap issuance around 200/s.
    assert!(outcome.summary.queries_issued < 100);
    assert!(!outcome.summary.valid);
    assert!(
        outcome
            .summary
            .invalid_reasons
            .iter()
            .any(|r| r.contains("below target"))
    );
}

#[test]
fn server_coalescing_merges_overdue_queries() {
    let mut requested = RequestedSettings::new(Scenario::Server, Mode::PerformanceOnly);
    requested.server_target_qps = 2000.0;
    requested.server_coalesce_queries = true;
    requested.min_duration = Duration::from_millis(100);
    requested.min_query_count = 1;
    let (settings, _) = resolve(&requested, 64).expect("resolve");

    // 5ms inline service against 0.5ms arrival slots: the scheduler is
    // always behind, so overdue slots fold into each issued query.
    let sut = MockSut::new(Behavior::Immediate {
        latency: Duration::from_millis(5),
    });
    let qsl = NullLibrary::new(64, 64);
    let logger = Logger::spawn(Box::new(std::io::sink()), None).expect("logger");

    let outcome = run(sut.clone(), qsl, &settings, &logger.handle(), &quick_options()).expect("run");
    logger.finish().expect("finish");

    assert_eq!(outcome.state, RunState::Done);
    let issued = sut.issued_indices();
    let coalesced = issued.iter().filter(|q| q.len() > 1).count();
    assert!(coalesced > 0, "no queries were coalesced");
    let samples: usize = issued.iter().map(Vec::len).sum();
    assert!(samples as u64 > outcome.summary.queries_issued);
}

#[test]
fn bogus_completion_id_aborts_the_run() {
    let mut requested = RequestedSettings::new(Scenario::Server, Mode::PerformanceOnly);
    requested.server_target_qps = 100.0;
    requested.min_duration = Duration::from_millis(50);
    requested.min_query_count = 1;
    let (settings, _) = resolve(&requested, 64).expect("resolve");

    let sut = MockSut::new(Behavior::BogusId);
    let qsl = NullLibrary::new(64, 64);
    let sink = SharedSink::default();
    let logger = Logger::spawn(Box::new(sink.clone()), None).expect("logger");

    let outcome = run(sut, qsl, &settings, &logger.handle(), &quick_options()).expect("run");
    logger.finish().expect("finish");

    assert_eq!(outcome.state, RunState::Aborted);
    assert!(outcome.summary.aborted);
    assert!(!outcome.summary.valid);
    assert!(sink.contents().contains("FATAL"));
}

#[test]
fn silent_sut_times_out_the_grace_window_and_aborts() {
    let mut requested = RequestedSettings::new(Scenario::SingleStream, Mode::PerformanceOnly);
    requested.min_duration = Duration::from_millis(20);
    requested.min_query_count = 1;
    let (settings, _) = resolve(&requested, 64).expect("resolve");

    let sut = MockSut::new(Behavior::Silent);
    let qsl = NullLibrary::new(64, 64);
    let logger = Logger::spawn(Box::new(std::io::sink()), None).expect("logger");
    let options = RunOptions {
        log_queries: false,
        drain_grace: Some(Duration::from_millis(100)),
    };

    let outcome = run(sut, qsl, &settings, &logger.handle(), &options).expect("run");
    logger.finish().expect("finish");

    assert_eq!(outcome.state, RunState::Aborted);
    assert!(outcome.summary.aborted);
}

#[test]
fn accuracy_mode_covers_the_library_and_rotates_sets() {
    let mut requested = RequestedSettings::new(Scenario::Server, Mode::AccuracyOnly);
    requested.server_target_qps = 2000.0;
    let (settings, _) = resolve(&requested, 16).expect("resolve");

    let sut = MockSut::new(Behavior::Immediate {
        latency: Duration::from_micros(20),
    });
    let qsl = NullLibrary::new(64, 16);
    let detail = SharedSink::default();
    let accuracy = SharedSink::default();
    let logger =
        Logger::spawn(Box::new(detail.clone()), Some(Box::new(accuracy.clone()))).expect("logger");

    let outcome = run(sut.clone(), qsl.clone(), &settings, &logger.handle(), &quick_options())
        .expect("run");
    logger.finish().expect("finish");

    assert_eq!(outcome.state, RunState::Done);
    assert!(outcome.summary.valid);
    assert_eq!(outcome.summary.queries_issued, 64);

    // Four loadable sets of 16: four loads, four unloads, in order.
    assert_eq!(qsl.loads.lock().len(), 4);
    assert_eq!(qsl.unloads.lock().len(), 4);

    // Every library sample issued exactly once.
    let mut all: Vec<u64> = sut.issued_indices().into_iter().flatten().collect();
    all.sort_unstable();
    assert_eq!(all, (0..64).collect::<Vec<_>>());

    // And every completion landed in the accuracy log.
    assert_eq!(accuracy.contents().lines().count(), 64);
}

#[test]
fn performance_issue_unique_issues_each_loaded_sample_once() {
    let mut requested = RequestedSettings::new(Scenario::Server, Mode::PerformanceOnly);
    requested.server_target_qps = 100_000.0;
    requested.performance_issue_unique = true;
    requested.min_duration = Duration::from_millis(1);
    requested.min_query_count = 1;
    let (settings, _) = resolve(&requested, 512).expect("resolve");

    let sut = MockSut::new(Behavior::Immediate {
        latency: Duration::from_micros(5),
    });
    let qsl = NullLibrary::new(512, 512);
    let logger = Logger::spawn(Box::new(std::io::sink()), None).expect("logger");

    let outcome = run(sut.clone(), qsl, &settings, &logger.handle(), &quick_options())
        .expect("run");
    logger.finish().expect("finish");

    assert_eq!(outcome.state, RunState::Done);
    assert_eq!(outcome.summary.queries_issued, 512);

    // The warmup query re-issues the first block; every loaded sample is
    // measured exactly once.
    let issued = sut.issued_indices();
    assert_eq!(issued.len(), 513);
    let mut measured: Vec<u64> = issued.into_iter().skip(1).flatten().collect();
    measured.sort_unstable();
    assert_eq!(measured.len(), 512);
    measured.dedup();
    assert_eq!(measured.len(), 512);
}

#[test]
fn warmup_query_is_excluded_from_measurement() {
    let mut requested = RequestedSettings::new(Scenario::SingleStream, Mode::PerformanceOnly);
    requested.min_duration = Duration::from_millis(1);
    requested.min_query_count = 10;
    let (settings, _) = resolve(&requested, 64).expect("resolve");

    let sut = MockSut::new(Behavior::Immediate {
        latency: Duration::from_micros(50),
    });
    let qsl = NullLibrary::new(64, 64);
    let logger = Logger::spawn(Box::new(std::io::sink()), None).expect("logger");

    let outcome = run(sut.clone(), qsl, &settings, &logger.handle(), &quick_options())
        .expect("run");
    logger.finish().expect("finish");

    assert_eq!(outcome.state, RunState::Done);
    assert_eq!(sut.issued_indices().len(), 11);
    assert_eq!(outcome.summary.queries_issued, 10);
    assert_eq!(outcome.latencies.len(), 10);
}
