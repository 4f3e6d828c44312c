//! Playback clock trait and error types.

use thiserror::Error;

/// Error type for clock operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ClockError {
    /// The clock could not be resumed
    #[error("clock resume failed: {0}")]
    Resume(String),
    /// The clock could not be suspended
    #[error("clock suspend failed: {0}")]
    Suspend(String),
}

/// The authoritative, monotonic time reference for scheduling.
pub trait PlaybackClock {
    /// Current time in seconds. Never decreases.
    fn now(&self) -> f64;

    /// Let time run.
    fn resume(&mut self) -> Result<(), ClockError>;

    /// Freeze time.
    fn suspend(&mut self) -> Result<(), ClockError>;
}
