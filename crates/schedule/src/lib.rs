// SPDX-License-Identifier: Apache-2.0

//! Deterministic sample schedules.
//!
//! Everything in this crate is a pure function of [`EffectiveSettings`] and
//! the library's total sample count: the same inputs produce bit-identical
//! schedules on every platform and every run. Three independent seeded
//! streams shape a schedule:
//!
//! - the *library shuffle* (`qsl_rng_seed`) picks which samples are loaded
//!   and in what order,
//! - the *sample selection* stream (`sample_index_rng_seed`) picks the
//!   samples of each query from the loaded working set,
//! - the *schedule jitter* stream (`schedule_rng_seed`) draws Poisson
//!   inter-arrival gaps for the Server scenario.
//!
//! A fourth stream (`accuracy_log_rng_seed`) flags, at generation time, the
//! queries whose responses will be copied to the accuracy log.
//!
//! [`EffectiveSettings`]: loadgen_config::EffectiveSettings

use loadgen_config::EffectiveSettings;

mod generate;
mod sets;

pub use generate::{Schedule, ScheduledQuery, generate_schedule};
pub use sets::LoadableSets;

/// Regenerates the schedule and returns its `query_index`-th entry.
///
/// The schedule stream is restartable from any index given only the settings
/// and seeds; this is the reference way to seek it.
#[must_use]
pub fn query_at(
    settings: &EffectiveSettings,
    total_sample_count: u64,
    query_index: usize,
) -> Option<ScheduledQuery> {
    let sets = LoadableSets::generate(settings, total_sample_count);
    let schedule = generate_schedule(settings, &sets);
    schedule.queries().get(query_index).cloned()
}
