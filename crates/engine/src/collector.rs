// SPDX-License-Identifier: Apache-2.0

//! The completion collector.
//!
//! SUT completion threads land here, on whatever thread and in whatever
//! order the SUT chooses. The completion timestamp is captured on entry,
//! before any accounting, so downstream processing never inflates a
//! latency. A fatal lookup failure (unknown query id, out-of-range sample
//! position) aborts the run; everything else is lock-free bookkeeping.

use crate::QuerySampleResponse;
use crate::clock::Clock;
use crate::recorder::LatencyRecorder;
use crate::ring::QueryRing;
use crate::state::StatusBoard;
use data_encoding::HEXLOWER;
use loadgen_reporting::LogHandle;
use loadgen_reporting::event::{AccuracyRecord, LogEvent};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

pub(crate) struct Collector {
    clock: Clock,
    pub(crate) ring: QueryRing,
    pub(crate) recorder: LatencyRecorder,
    status: Arc<StatusBoard>,
    log: LogHandle,
    log_queries: bool,
    last_measured_completion_ns: AtomicI64,
}

impl Collector {
    pub(crate) fn new(
        clock: Clock,
        ring: QueryRing,
        recorder: LatencyRecorder,
        status: Arc<StatusBoard>,
        log: LogHandle,
        log_queries: bool,
    ) -> Self {
        Collector {
            clock,
            ring,
            recorder,
            status,
            log,
            log_queries,
            last_measured_completion_ns: AtomicI64::new(0),
        }
    }

    /// Latest completion timestamp among measured samples.
    pub(crate) fn last_measured_completion_ns(&self) -> i64 {
        self.last_measured_completion_ns.load(Ordering::Acquire)
    }

    /// The run's shared clock anchor.
    pub(crate) fn clock(&self) -> Clock {
        self.clock
    }

    /// Whether per-query trace events are enabled.
    pub(crate) fn log_queries(&self) -> bool {
        self.log_queries
    }

    fn complete(&self, responses: &[QuerySampleResponse]) {
        // First line of the callback: exclude our own bookkeeping from the
        // measured latency.
        let t_complete_ns = self.clock.now_ns();

        for response in responses {
            match self.ring.on_sample_complete(response.id, t_complete_ns) {
                Ok(done) => {
                    if done.measured {
                        self.recorder.record(done.query_id, done.latency_ns);
                        let _ = self
                            .last_measured_completion_ns
                            .fetch_max(t_complete_ns, Ordering::AcqRel);
                    }
                    if let Some(qsl_idx) = done.qsl_index {
                        self.log.log(LogEvent::AccuracyRecord(AccuracyRecord {
                            qsl_idx,
                            query_id: done.query_id,
                            sample_id: response.id,
                            data: HEXLOWER.encode(&response.data),
                        }));
                    }
                    if done.query_done {
                        if self.log_queries {
                            self.log.log(LogEvent::QueryCompleted {
                                query_id: done.query_id,
                                completed_ns: t_complete_ns,
                            });
                        }
                        self.status.on_query_done();
                    }
                }
                Err(error) => {
                    self.log.fatal(error.to_string());
                    self.status.abort();
                }
            }
        }
    }
}

/// The handle a SUT uses to report completed samples.
///
/// Cloneable and thread-safe: the SUT may complete from any thread, in any
/// order, and may complete synchronously before `issue_query` returns.
#[derive(Clone)]
pub struct CompletionHandle {
    collector: Arc<Collector>,
}

impl CompletionHandle {
    pub(crate) fn new(collector: Arc<Collector>) -> Self {
        CompletionHandle { collector }
    }

    /// Reports completed samples. The completion timestamp is captured on
    /// entry; response data is only inspected for accuracy logging.
    pub fn query_samples_complete(&self, responses: &[QuerySampleResponse]) {
        self.collector.complete(responses);
    }
}
