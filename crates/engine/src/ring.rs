// SPDX-License-Identifier: Apache-2.0

//! The in-flight query arena.
//!
//! A fixed-size ring of slots indexed by `query_id % capacity`. The issue
//! scheduler is the only writer of new records; SUT completion threads are
//! the readers; whichever completion drains a query's last sample releases
//! the slot. Slots hold atomics only, published by a release-store of the
//! query-id tag, so the completion path never takes a lock for latency
//! accounting. The one exception is the per-slot sample-index list, which
//! exists solely for accuracy logging and is consulted only for queries
//! flagged for it.
//!
//! Sample ids carry their ring coordinates: the query id in the high 40
//! bits, the within-query position in the low 24. The SUT treats them as
//! opaque and echoes them back on completion.

use crate::error::Error;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// Bits of a sample id holding the within-query position.
pub const POSITION_BITS: u32 = 24;

const POSITION_MASK: u64 = (1 << POSITION_BITS) - 1;
const EMPTY_TAG: u64 = u64::MAX;

/// Builds the sample id for `position` within `query_id`.
#[inline]
#[must_use]
pub fn pack_sample_id(query_id: u64, position: u64) -> u64 {
    (query_id << POSITION_BITS) | position
}

/// Splits a sample id into `(query_id, position)`.
#[inline]
#[must_use]
pub fn unpack_sample_id(sample_id: u64) -> (u64, u64) {
    (sample_id >> POSITION_BITS, sample_id & POSITION_MASK)
}

struct Slot {
    tag: AtomicU64,
    scheduled_ns: AtomicI64,
    issue_ns: AtomicI64,
    sample_count: AtomicU64,
    remaining: AtomicU64,
    measured: AtomicBool,
    // Cold path: present only for accuracy-logged queries.
    accuracy_indices: Mutex<Option<Vec<u64>>>,
}

impl Slot {
    fn empty() -> Self {
        Slot {
            tag: AtomicU64::new(EMPTY_TAG),
            scheduled_ns: AtomicI64::new(0),
            issue_ns: AtomicI64::new(0),
            sample_count: AtomicU64::new(0),
            remaining: AtomicU64::new(0),
            measured: AtomicBool::new(false),
            accuracy_indices: Mutex::new(None),
        }
    }
}

/// Everything the collector needs about one completed sample.
#[derive(Debug)]
pub struct CompletedSample {
    /// The query the sample belonged to.
    pub query_id: u64,
    /// Latency from issue to this completion.
    pub latency_ns: i64,
    /// When the query was issued.
    pub issue_ns: i64,
    /// Whether the query was issued during MEASURING.
    pub measured: bool,
    /// Library index of the sample, when the query is accuracy-logged.
    pub qsl_index: Option<u64>,
    /// True when this completion drained the query's last sample and
    /// released its slot.
    pub query_done: bool,
}

/// Fixed-capacity arena of in-flight query records.
pub struct QueryRing {
    slots: Box<[Slot]>,
}

impl QueryRing {
    /// A ring holding at least `min_capacity` in-flight queries.
    #[must_use]
    pub fn with_capacity(min_capacity: usize) -> Self {
        let capacity = min_capacity.max(16).next_power_of_two();
        let slots = (0..capacity).map(|_| Slot::empty()).collect();
        QueryRing { slots }
    }

    /// Number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Publishes the record of a newly issued query.
    ///
    /// The caller guarantees ids are monotonic, so a still-occupied slot
    /// means more than `capacity` queries are in flight: an invariant
    /// violation, not backpressure.
    pub fn publish(
        &self,
        query_id: u64,
        scheduled_ns: i64,
        issue_ns: i64,
        sample_count: u64,
        measured: bool,
        accuracy_indices: Option<&[u64]>,
    ) -> Result<(), Error> {
        let slot = &self.slots[(query_id % self.slots.len() as u64) as usize];
        let occupant = slot.tag.load(Ordering::Acquire);
        if occupant != EMPTY_TAG {
            return Err(Error::RingSlotOccupied { query_id, occupant });
        }
        slot.scheduled_ns.store(scheduled_ns, Ordering::Relaxed);
        slot.issue_ns.store(issue_ns, Ordering::Relaxed);
        slot.sample_count.store(sample_count, Ordering::Relaxed);
        slot.remaining.store(sample_count, Ordering::Relaxed);
        slot.measured.store(measured, Ordering::Relaxed);
        if let Some(indices) = accuracy_indices {
            *slot.accuracy_indices.lock() = Some(indices.to_vec());
        }
        slot.tag.store(query_id, Ordering::Release);
        Ok(())
    }

    /// Accounts for one completed sample and releases the slot when it was
    /// the query's last.
    pub fn on_sample_complete(
        &self,
        sample_id: u64,
        t_complete_ns: i64,
    ) -> Result<CompletedSample, Error> {
        let (query_id, position) = unpack_sample_id(sample_id);
        let slot = &self.slots[(query_id % self.slots.len() as u64) as usize];
        if slot.tag.load(Ordering::Acquire) != query_id {
            return Err(Error::UnknownQueryId { query_id, sample_id });
        }
        let sample_count = slot.sample_count.load(Ordering::Relaxed);
        if position >= sample_count {
            return Err(Error::SamplePositionOutOfRange {
                query_id,
                position,
                sample_count,
            });
        }

        let issue_ns = slot.issue_ns.load(Ordering::Relaxed);
        let measured = slot.measured.load(Ordering::Relaxed);
        let qsl_index = {
            let indices = slot.accuracy_indices.lock();
            indices.as_ref().map(|v| v[position as usize])
        };

        let prev = slot.remaining.fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            // A duplicate completion raced the release; undo and reject.
            let _ = slot.remaining.fetch_add(1, Ordering::AcqRel);
            return Err(Error::UnknownQueryId { query_id, sample_id });
        }
        let query_done = prev == 1;
        if query_done {
            *slot.accuracy_indices.lock() = None;
            slot.tag.store(EMPTY_TAG, Ordering::Release);
        }

        Ok(CompletedSample {
            query_id,
            latency_ns: t_complete_ns - issue_ns,
            issue_ns,
            measured,
            qsl_index,
            query_done,
        })
    }
}
