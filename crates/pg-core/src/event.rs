//! Events produced by lead pulses and the notices that route them.

use crate::{ListenerId, Period};

/// One step of a lead pulse, as enumerated by its cursor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PulseEvent {
    /// Step index within the lead's period: `0..period`
    pub index: u32,
    /// Playback clock time in seconds
    pub time: f64,
}

/// A tick delivered to one listener, in the listener's own resolution.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepTick {
    /// The listener's own step: `0..steps`
    pub step: u32,
    /// The listener's period
    pub steps: u32,
    /// Playback clock time in seconds
    pub time: f64,
}

/// An entry in the presentation queue.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScheduledTick {
    /// Step index of the lead that produced the event
    pub step_index: u32,
    /// Period of that lead
    pub total_steps: u32,
    /// Playback clock time in seconds
    pub timestamp: f64,
}

/// Routing notice emitted by the registry whenever a listener's source
/// clock is decided or changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Derivation {
    /// `listener`, registered at `period`, now takes its ticks from the
    /// lead pulse at `lead`.
    Derive {
        listener: ListenerId,
        period: Period,
        lead: Period,
    },
    /// `listener` no longer receives ticks.
    Detach { listener: ListenerId },
}

impl Derivation {
    /// The listener this notice concerns.
    pub fn listener(&self) -> ListenerId {
        match *self {
            Derivation::Derive { listener, .. } | Derivation::Detach { listener } => listener,
        }
    }
}
