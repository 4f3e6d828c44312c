//! Shared tempo.

use crate::Period;

/// Source of the cycle length, read fresh on every scheduling pass.
pub trait TempoProvider {
    /// Length of one full cycle in seconds.
    fn cycle_duration(&self) -> f64;

    /// Length of one step of `period` in seconds.
    fn step_duration(&self, period: Period) -> f64 {
        self.cycle_duration() / period.get() as f64
    }
}

/// Beats per minute and the number of beats that make up one cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tempo {
    pub bpm: f64,
    pub beats_per_cycle: u32,
}

impl Tempo {
    pub const fn new(bpm: f64, beats_per_cycle: u32) -> Self {
        Self { bpm, beats_per_cycle }
    }

    /// A tempo is usable if both the rate and the cycle length are positive.
    pub fn is_valid(&self) -> bool {
        self.bpm.is_finite() && self.bpm > 0.0 && self.beats_per_cycle > 0
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self::new(120.0, 4)
    }
}

impl TempoProvider for Tempo {
    fn cycle_duration(&self) -> f64 {
        60.0 / self.bpm * self.beats_per_cycle as f64
    }
}
