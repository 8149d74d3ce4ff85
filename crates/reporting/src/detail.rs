// SPDX-License-Identifier: Apache-2.0

//! Detail-log line formatting.
//!
//! The detail log is line oriented. Settings appear twice, tagged
//! `Requested Settings:` and `Effective Settings:`, using the same key
//! vocabulary as the summary; the requested block shows the values before
//! derivation and fallback recovery, the effective block after.

use loadgen_config::{EffectiveSettings, RequestedSettings, Scenario};
use std::io::{self, Write};

/// Summary/detail key-value pairs for a requested configuration, prior to
/// any derivation: invalid values appear here exactly as requested.
#[must_use]
pub fn requested_fields(r: &RequestedSettings) -> Vec<(&'static str, String)> {
    let (target_qps, target_latency_ns, samples_per_query, max_async): (f64, u128, u64, i64) =
        match r.scenario {
            Scenario::SingleStream => (
                1e9 / r.single_stream_expected_latency.as_nanos().max(1) as f64,
                r.single_stream_expected_latency.as_nanos(),
                1,
                1,
            ),
            Scenario::MultiStream | Scenario::MultiStreamFree => (
                r.multi_stream_target_qps,
                r.multi_stream_target_latency.as_nanos(),
                r.multi_stream_samples_per_query,
                r.multi_stream_max_async_queries as i64,
            ),
            Scenario::Server => (r.server_target_qps, r.server_target_latency.as_nanos(), 1, -1),
            Scenario::Offline => (r.offline_expected_qps, 0, 1, -1),
        };

    vec![
        ("scenario", r.scenario.to_string()),
        ("mode", r.mode.to_string()),
        ("samples_per_query", samples_per_query.to_string()),
        ("target_qps", target_qps.to_string()),
        ("target_latency (ns)", target_latency_ns.to_string()),
        ("max_async_queries", max_async.to_string()),
        ("min_duration (ms)", r.min_duration.as_millis().to_string()),
        ("max_duration (ms)", r.max_duration.as_millis().to_string()),
        ("min_query_count", r.min_query_count.to_string()),
        ("max_query_count", r.max_query_count.to_string()),
        ("qsl_rng_seed", r.qsl_rng_seed.to_string()),
        ("sample_index_rng_seed", r.sample_index_rng_seed.to_string()),
        ("schedule_rng_seed", r.schedule_rng_seed.to_string()),
        ("accuracy_log_rng_seed", r.accuracy_log_rng_seed.to_string()),
        ("accuracy_log_probability", r.accuracy_log_probability.to_string()),
        ("performance_issue_unique", r.performance_issue_unique.to_string()),
        ("performance_issue_same", r.performance_issue_same.to_string()),
        ("performance_issue_same_index", r.performance_issue_same_index.to_string()),
        ("performance_sample_count", r.performance_sample_count_override.to_string()),
    ]
}

/// Summary/detail key-value pairs for the effective plan.
#[must_use]
pub fn effective_fields(e: &EffectiveSettings) -> Vec<(&'static str, String)> {
    vec![
        ("scenario", e.scenario.to_string()),
        ("mode", e.mode.to_string()),
        ("samples_per_query", e.samples_per_query.to_string()),
        ("target_qps", e.target_qps.to_string()),
        ("target_latency (ns)", e.target_latency.as_nanos().to_string()),
        ("max_async_queries", e.max_async_queries.to_string()),
        ("min_duration (ms)", e.min_duration.as_millis().to_string()),
        ("max_duration (ms)", e.max_duration.as_millis().to_string()),
        ("min_query_count", e.min_query_count.to_string()),
        ("max_query_count", e.max_query_count.to_string()),
        ("qsl_rng_seed", e.qsl_rng_seed.to_string()),
        ("sample_index_rng_seed", e.sample_index_rng_seed.to_string()),
        ("schedule_rng_seed", e.schedule_rng_seed.to_string()),
        ("accuracy_log_rng_seed", e.accuracy_log_rng_seed.to_string()),
        ("accuracy_log_probability", e.accuracy_log_probability.to_string()),
        ("performance_issue_unique", e.performance_issue_unique.to_string()),
        ("performance_issue_same", e.performance_issue_same.to_string()),
        ("performance_issue_same_index", e.performance_issue_same_index.to_string()),
        ("performance_sample_count", e.performance_sample_count.to_string()),
    ]
}

pub(crate) fn write_settings_block(
    w: &mut dyn Write,
    tag: &str,
    fields: &[(&'static str, String)],
) -> io::Result<()> {
    writeln!(w, "{tag}")?;
    for (key, value) in fields {
        writeln!(w, "{key} : {value}")?;
    }
    Ok(())
}
