//! Wall-clock playback time.

use crate::traits::{ClockError, PlaybackClock};
use std::time::{Duration, Instant};

/// Seconds elapsed since creation, not counting suspended spans.
///
/// Starts suspended.
#[derive(Clone, Debug)]
pub struct SystemClock {
    /// Time accumulated before the current running span
    banked: Duration,
    /// Start of the current running span
    running_since: Option<Instant>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            banked: Duration::ZERO,
            running_since: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    fn elapsed(&self) -> Duration {
        match self.running_since {
            Some(since) => self.banked + since.elapsed(),
            None => self.banked,
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackClock for SystemClock {
    fn now(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }

    fn resume(&mut self) -> Result<(), ClockError> {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
        Ok(())
    }

    fn suspend(&mut self) -> Result<(), ClockError> {
        if let Some(since) = self.running_since.take() {
            self.banked += since.elapsed();
        }
        Ok(())
    }
}
