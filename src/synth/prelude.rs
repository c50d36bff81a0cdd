// Shared constants and helpers for the synth modules

pub use core::f32::consts::{PI, TAU};
pub use std::sync::OnceLock;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Deterministic generator for tables that are filled outside the audio path.
pub fn seeded_rng(seed: u64) -> SmallRng {
    SmallRng::seed_from_u64(seed)
}

/// Fills `table` with bipolar white noise in [-1, 1).
pub fn fill_random(table: &mut [f32], seed: u64) {
    let mut rng = seeded_rng(seed);
    for sample in table.iter_mut() {
        *sample = rng.random_range(-1.0..1.0);
    }
}
