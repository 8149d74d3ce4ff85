// SPDX-License-Identifier: Apache-2.0

//! The issue engine: scenario loops, completion collection, and latency
//! recording.
//!
//! The engine drives a [`SystemUnderTest`] through the traffic pattern an
//! effective plan calls for, timestamps every query on a single monotonic
//! clock, collects completions from arbitrary SUT threads through a
//! fixed-size lock-free ring, and judges the measured latencies against the
//! scenario's service-level objectives.
//!
//! Thread roles are fixed: one issue scheduler, one sample loader, the
//! logger owned by the reporting crate, and whatever completion threads the
//! SUT brings. The engine never retries and never cancels: a query issued
//! is a query measured, and a completion that cannot be accounted for
//! aborts the run.

use bytes::Bytes;

pub mod clock;
mod collector;
pub mod error;
pub mod loader;
pub mod recorder;
pub mod ring;
pub mod run;
pub mod state;

pub use collector::CompletionHandle;
pub use run::{RunOptions, RunOutcome, run};
pub use state::RunState;

/// One input unit handed to the SUT.
///
/// The `id` is opaque to the SUT and must be echoed back on completion;
/// `index` addresses the backing data in the sample library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuerySample {
    /// Opaque completion token.
    pub id: u64,
    /// Library index of the sample's data.
    pub index: u64,
}

/// One completed sample reported by the SUT.
#[derive(Debug, Clone)]
pub struct QuerySampleResponse {
    /// The `id` of the [`QuerySample`] this responds to.
    pub id: u64,
    /// Response payload. Read only by accuracy logging; never by latency
    /// accounting.
    pub data: Bytes,
}

/// The inference system being benchmarked.
///
/// `issue_query` is a synchronous dispatch: the SUT may complete samples on
/// the calling thread before returning, or from any other thread later, by
/// calling [`CompletionHandle::query_samples_complete`].
pub trait SystemUnderTest: Send + Sync {
    /// Human-readable name for reports.
    fn name(&self) -> &str;

    /// Accepts one query. Every sample must eventually be completed exactly
    /// once through `completer`.
    fn issue_query(&self, samples: Vec<QuerySample>, completer: CompletionHandle);

    /// Invoked when issuance stops; the SUT should finish anything batched.
    fn flush_queries(&self);

    /// Receives the full measured latency set when the run reaches DONE.
    fn report_latency_results(&self, latencies_ns: &[i64]);
}

/// External owner of the input data, addressed by sample index.
pub trait QuerySampleLibrary: Send + Sync {
    /// Human-readable name for reports.
    fn name(&self) -> &str;

    /// Total number of samples the library can serve.
    fn total_sample_count(&self) -> u64;

    /// How many samples fit in the in-memory working set.
    fn performance_sample_count(&self) -> u64;

    /// Makes `indices` resident. Blocking.
    fn load_samples_to_ram(&self, indices: &[u64]);

    /// Releases `indices`. Blocking.
    fn unload_samples_from_ram(&self, indices: &[u64]);
}
