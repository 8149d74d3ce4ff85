// SPDX-License-Identifier: Apache-2.0

//! Loadable sample sets: which library samples are resident, and when.

use loadgen_config::{EffectiveSettings, Mode};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_pcg::Pcg64;

/// The ordered groups of library samples the run loads into RAM.
///
/// Performance runs use a single set: a seeded uniform permutation of
/// `[0, performance_sample_count)`. Accuracy runs must touch every library
/// sample once, so the whole of `[0, total_sample_count)` is shuffled and
/// chunked into sets of at most `performance_sample_count`; the cache
/// controller rotates through them in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadableSets {
    sets: Vec<Vec<u64>>,
}

impl LoadableSets {
    /// Computes the loadable sets for this run.
    #[must_use]
    pub fn generate(settings: &EffectiveSettings, total_sample_count: u64) -> Self {
        let mut rng = Pcg64::seed_from_u64(settings.qsl_rng_seed);
        let working_set = settings.performance_sample_count as usize;

        let sets = if settings.mode == Mode::AccuracyOnly {
            let mut all: Vec<u64> = (0..total_sample_count).collect();
            all.shuffle(&mut rng);
            all.chunks(working_set.max(1)).map(<[u64]>::to_vec).collect()
        } else {
            let mut loaded: Vec<u64> = (0..settings.performance_sample_count).collect();
            loaded.shuffle(&mut rng);
            vec![loaded]
        };

        LoadableSets { sets }
    }

    /// Number of loadable sets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// True when no set was generated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// The library sample indices of set `index`.
    #[must_use]
    pub fn set(&self, index: usize) -> &[u64] {
        &self.sets[index]
    }

    /// Iterates over all sets in load order.
    pub fn iter(&self) -> impl Iterator<Item = &[u64]> {
        self.sets.iter().map(Vec::as_slice)
    }
}
