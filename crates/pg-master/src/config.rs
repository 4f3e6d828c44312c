//! Transport settings.

use crate::TransportError;
use pg_core::Tempo;
use std::time::Duration;

/// Default lookahead window in seconds.
pub const DEFAULT_LOOKAHEAD: f64 = 0.1;
/// Default coarse timer interval.
pub const DEFAULT_TIMER_INTERVAL: Duration = Duration::from_millis(25);

/// How far ahead to schedule, how often to wake, and how fast to play.
///
/// The lookahead must comfortably exceed the timer interval, or a late
/// wake-up leaves steps to be emitted after their time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransportConfig {
    /// Seconds of steps enumerated ahead of the clock on each signal
    pub lookahead: f64,
    /// Period of the coarse timer
    pub timer_interval: Duration,
    pub tempo: Tempo,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            lookahead: DEFAULT_LOOKAHEAD,
            timer_interval: DEFAULT_TIMER_INTERVAL,
            tempo: Tempo::default(),
        }
    }
}

impl TransportConfig {
    pub fn with_lookahead(mut self, seconds: f64) -> Self {
        self.lookahead = seconds;
        self
    }

    pub fn with_timer_interval(mut self, interval: Duration) -> Self {
        self.timer_interval = interval;
        self
    }

    pub fn with_tempo(mut self, tempo: Tempo) -> Self {
        self.tempo = tempo;
        self
    }

    pub fn validate(&self) -> Result<(), TransportError> {
        if !(self.lookahead.is_finite() && self.lookahead > 0.0) {
            return Err(TransportError::InvalidConfig(format!(
                "lookahead must be positive, got {}",
                self.lookahead
            )));
        }
        if self.timer_interval.is_zero() {
            return Err(TransportError::InvalidConfig("timer interval must be non-zero".into()));
        }
        if !self.tempo.is_valid() {
            return Err(TransportError::InvalidConfig(format!("unusable tempo {:?}", self.tempo)));
        }
        Ok(())
    }
}
