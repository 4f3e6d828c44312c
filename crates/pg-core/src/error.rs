//! Error type shared by the pulse hierarchy.

use crate::Period;
use thiserror::Error;

/// Errors raised by pulse construction, advancing and updates.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PulseError {
    /// A period must have at least one step.
    #[error("period must be at least 1 step, got {0}")]
    InvalidPeriod(u32),

    /// Only lead pulses own a cursor and can advance.
    #[error("pulse with period {0} is not a lead")]
    NotLead(Period),

    /// The listener was deregistered but could not be registered at its
    /// new period. It is left unregistered.
    #[error("re-registration at {steps} steps failed, listener left unregistered")]
    UpdateFailed {
        /// The step count that was requested.
        steps: u32,
        /// Why registration failed.
        #[source]
        source: Box<PulseError>,
    },
}
