// SPDX-License-Identifier: Apache-2.0

//! Errors for the issue engine.
//!
//! Important note: errors must stay `Send` so they can be surfaced from the
//! scheduler thread and from SUT completion threads alike.

/// Errors that can occur while driving a run.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Failed to spawn an OS thread.
    #[error("Failed to spawn thread '{thread_name}': {source}")]
    ThreadSpawnError {
        /// Name of the thread we attempted to spawn.
        thread_name: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A service thread panicked.
    #[error("Thread '{thread_name}' panicked: {panic_message}")]
    ThreadJoinPanic {
        /// Name of the thread that panicked.
        thread_name: String,
        /// Panic message.
        panic_message: String,
    },

    /// A completion arrived for a query id the ring does not hold.
    #[error("Completion for unknown query id {query_id} (sample id {sample_id})")]
    UnknownQueryId {
        /// Decoded query id.
        query_id: u64,
        /// Sample id as received from the SUT.
        sample_id: u64,
    },

    /// A completion addressed a sample position past the query's length.
    #[error("Sample position {position} out of range for query {query_id} ({sample_count} samples)")]
    SamplePositionOutOfRange {
        /// Decoded query id.
        query_id: u64,
        /// Decoded within-query position.
        position: u64,
        /// Number of samples the query carried.
        sample_count: u64,
    },

    /// The slot for a new query still holds a live record.
    #[error("Query ring slot for query id {query_id} is still occupied by query id {occupant}")]
    RingSlotOccupied {
        /// Query id being published.
        query_id: u64,
        /// Query id currently holding the slot.
        occupant: u64,
    },

    /// The loader thread went away while a rotation was pending.
    #[error("Sample loader stopped before servicing a rotation to set {set_index}")]
    LoaderUnavailable {
        /// The loadable set whose rotation was requested.
        set_index: usize,
    },
}
