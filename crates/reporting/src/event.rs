// SPDX-License-Identifier: Apache-2.0

//! Immutable log-event records.
//!
//! Events are constructed on the producing thread with whatever timestamps
//! it already holds; the logger thread does the formatting. Keeping these
//! records plain data (no closures, no borrowed buffers) is what lets them
//! cross the channel without the producers sharing any logging state.

use loadgen_config::{ConfigEvent, EffectiveSettings, RequestedSettings};
use serde::Serialize;

/// A single event bound for the detail or accuracy log.
#[derive(Debug)]
pub enum LogEvent {
    /// The run moved to a new lifecycle state.
    Lifecycle {
        /// State entered (for example `MEASURING`).
        state: &'static str,
        /// Monotonic nanoseconds since run start.
        t_ns: i64,
    },

    /// A recoverable configuration problem.
    ConfigError(ConfigEvent),

    /// An informational note.
    Info(String),

    /// A non-fatal runtime error.
    Error(String),

    /// A fatal error; the run is transitioning to ABORTED.
    Fatal(String),

    /// The settings block as the user requested it.
    RequestedSettings(Box<RequestedSettings>),

    /// The settings block after derivation.
    EffectiveSettings(Box<EffectiveSettings>),

    /// A query left the issue loop. Emitted only when per-query tracing is
    /// enabled in the log settings.
    QueryIssued {
        /// Monotonic id of the query.
        query_id: u64,
        /// Scheduled issue time, nanoseconds since measurement start.
        scheduled_ns: i64,
        /// Actual issue time, nanoseconds since measurement start.
        actual_ns: i64,
        /// Number of samples in the query.
        sample_count: u64,
    },

    /// All samples of a query completed. Emitted only when per-query
    /// tracing is enabled.
    QueryCompleted {
        /// Monotonic id of the query.
        query_id: u64,
        /// Completion time of the final sample, nanoseconds since
        /// measurement start.
        completed_ns: i64,
    },

    /// One sample's response bytes, bound for the accuracy log.
    AccuracyRecord(AccuracyRecord),

    /// Flush and stop the logger thread. Sent by [`crate::Logger::finish`];
    /// events already queued ahead of it are still written.
    Shutdown,
}

/// One accuracy-log line. Serialized as line-delimited JSON.
#[derive(Debug, Serialize)]
pub struct AccuracyRecord {
    /// Library index of the sample.
    pub qsl_idx: u64,
    /// Query the sample belonged to.
    pub query_id: u64,
    /// Sample id echoed by the SUT.
    pub sample_id: u64,
    /// Response payload, lowercase hex.
    pub data: String,
}
