//! Hand-driven playback time.

use crate::traits::{ClockError, PlaybackClock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// A clock whose time only moves when told to.
///
/// Clones share the same time, so a test can keep one handle while
/// another is owned by a transport.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    /// Seconds as f64 bits
    time: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move to `seconds`. Earlier times are ignored so the clock stays
    /// monotonic.
    pub fn set(&self, seconds: f64) {
        let current = f64::from_bits(self.time.load(Ordering::Acquire));
        if seconds > current {
            self.time.store(seconds.to_bits(), Ordering::Release);
        }
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl PlaybackClock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.time.load(Ordering::Acquire))
    }

    fn resume(&mut self) -> Result<(), ClockError> {
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn suspend(&mut self) -> Result<(), ClockError> {
        self.running.store(false, Ordering::Release);
        Ok(())
    }
}
