//! Shared types for the pulsegrid step scheduler.
//!
//! Every crate in the workspace speaks in these terms: a [`Period`] is the
//! number of equal steps a track divides one cycle into, a [`ListenerId`]
//! names a subscriber, and [`Derivation`] notices tell the scheduler which
//! lead clock a listener currently follows.

mod error;
mod event;
mod period;
mod tempo;

pub use error::PulseError;
pub use event::{Derivation, PulseEvent, ScheduledTick, StepTick};
pub use period::Period;
pub use tempo::{Tempo, TempoProvider};

slotmap::new_key_type! {
    /// Stable identity of a tick listener across registrations.
    pub struct ListenerId;
}
