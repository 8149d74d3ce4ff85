// SPDX-License-Identifier: Apache-2.0

//! The run lifecycle and the shared status board.
//!
//! ```text
//! INIT -> WARMUP -> MEASURING -> DRAINING -> DONE
//!           |            |
//!           +------------+--> ABORTED (fatal error)
//! ```
//!
//! The status board is the one piece of state the scheduler and the SUT's
//! completion threads both touch: the lifecycle state, the outstanding-query
//! count, and a condvar for the scheduler's blocking waits. Completions take
//! the lock only long enough to bump two counters; the latency path itself
//! (ring lookup, recording) never goes through here.

use parking_lot::{Condvar, Mutex};
use std::time::Instant;

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Waiting for the initial sample load.
    Init,
    /// Issuing the warmup query.
    Warmup,
    /// Issuing and measuring.
    Measuring,
    /// Issuance stopped; waiting for outstanding queries.
    Draining,
    /// All queries accounted for.
    Done,
    /// A fatal error ended the run.
    Aborted,
}

impl RunState {
    /// The label used in lifecycle log events.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            RunState::Init => "INIT",
            RunState::Warmup => "WARMUP",
            RunState::Measuring => "MEASURING",
            RunState::Draining => "DRAINING",
            RunState::Done => "DONE",
            RunState::Aborted => "ABORTED",
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: RunState,
    outstanding: u64,
    queries_issued: u64,
    queries_completed: u64,
}

/// Shared run status: lifecycle state plus in-flight accounting.
#[derive(Debug)]
pub struct StatusBoard {
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl StatusBoard {
    /// A fresh board in the INIT state.
    #[must_use]
    pub fn new() -> Self {
        StatusBoard {
            inner: Mutex::new(Inner {
                state: RunState::Init,
                outstanding: 0,
                queries_issued: 0,
                queries_completed: 0,
            }),
            changed: Condvar::new(),
        }
    }

    /// Moves to `state`. ABORTED is sticky: once entered, only ABORTED is
    /// ever reported again.
    pub fn set_state(&self, state: RunState) {
        let mut inner = self.inner.lock();
        if inner.state != RunState::Aborted {
            inner.state = state;
        }
        drop(inner);
        let _ = self.changed.notify_all();
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.inner.lock().state
    }

    /// True once the run has aborted.
    #[must_use]
    pub fn aborted(&self) -> bool {
        self.state() == RunState::Aborted
    }

    /// Marks the run aborted and wakes every waiter.
    pub fn abort(&self) {
        self.set_state(RunState::Aborted);
    }

    /// Records a query handed to the SUT.
    pub fn on_issue(&self) {
        let mut inner = self.inner.lock();
        inner.outstanding += 1;
        inner.queries_issued += 1;
    }

    /// Records the completion of a query's final sample.
    pub fn on_query_done(&self) {
        let mut inner = self.inner.lock();
        inner.outstanding = inner.outstanding.saturating_sub(1);
        inner.queries_completed += 1;
        drop(inner);
        let _ = self.changed.notify_all();
    }

    /// Queries handed to the SUT so far.
    #[must_use]
    pub fn queries_issued(&self) -> u64 {
        self.inner.lock().queries_issued
    }

    /// Queries fully completed so far.
    #[must_use]
    pub fn queries_completed(&self) -> u64 {
        self.inner.lock().queries_completed
    }

    /// Queries currently in flight.
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.inner.lock().outstanding
    }

    /// Blocks until nothing is outstanding, the run aborts, or `deadline`
    /// passes. Returns true when the in-flight count actually reached zero.
    pub fn wait_idle_until(&self, deadline: Option<Instant>) -> bool {
        let mut inner = self.inner.lock();
        loop {
            if inner.outstanding == 0 {
                return true;
            }
            if inner.state == RunState::Aborted {
                return false;
            }
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut inner, deadline).timed_out() {
                        return inner.outstanding == 0;
                    }
                }
                None => self.changed.wait(&mut inner),
            }
        }
    }

    /// Blocks until fewer than `limit` queries are outstanding or the run
    /// aborts. Returns false on abort.
    pub fn wait_slot_below(&self, limit: u64) -> bool {
        let mut inner = self.inner.lock();
        loop {
            if inner.state == RunState::Aborted {
                return false;
            }
            if inner.outstanding < limit {
                return true;
            }
            self.changed.wait(&mut inner);
        }
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        StatusBoard::new()
    }
}
