// SPDX-License-Identifier: Apache-2.0

//! Errors for settings resolution.
//!
//! These are the assertion-class failures of §configuration: states the run
//! could never recover from. Recoverable invalid values are reported as
//! [`crate::ConfigEvent`]s instead and never surface here.

/// Fatal settings-resolution errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// `performance_issue_same` and `performance_issue_unique` are mutually
    /// exclusive.
    #[error(
        "performance_issue_same and performance_issue_unique are mutually exclusive; both were set"
    )]
    ExclusivePerformanceIssueFlags,

    /// The fixed sample index must address a loaded sample.
    #[error(
        "performance_issue_same_index {index} is out of range for performance_sample_count {performance_sample_count}"
    )]
    SameIndexOutOfRange {
        /// Requested fixed sample index.
        index: u64,
        /// Size of the loaded working set.
        performance_sample_count: u64,
    },

    /// The sample library reported no loadable samples.
    #[error("the sample library reports a performance sample count of zero")]
    EmptySampleLibrary,

    /// Sample ids pack the within-query position into 24 bits.
    #[error("samples_per_query {samples_per_query} exceeds the supported maximum {limit}")]
    SamplesPerQueryTooLarge {
        /// Derived samples per query.
        samples_per_query: u64,
        /// Largest representable value.
        limit: u64,
    },

    /// Query ids pack into 40 bits of the sample id.
    #[error("max_query_count {max_query_count} exceeds the supported maximum {limit}")]
    QueryCountTooLarge {
        /// Requested query cap.
        max_query_count: u64,
        /// Largest representable value.
        limit: u64,
    },
}
