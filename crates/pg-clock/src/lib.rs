//! Playback clocks and the coarse timer task for pulsegrid.

mod manual;
mod system;
mod timer;
mod traits;

pub use manual::ManualClock;
pub use system::SystemClock;
pub use timer::{Timer, TimerCommand, TimerSignal};
pub use traits::{ClockError, PlaybackClock};
