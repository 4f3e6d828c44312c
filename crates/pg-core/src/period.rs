//! Step counts.

use crate::PulseError;
use core::fmt;
use core::num::NonZeroU32;

/// Number of equal steps one cycle is divided into.
///
/// Ordering is numeric, so a descending iteration over periods visits
/// the finest clocks first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period(NonZeroU32);

impl Period {
    /// Validate a raw step count.
    pub fn new(steps: u32) -> Result<Self, PulseError> {
        NonZeroU32::new(steps)
            .map(Self)
            .ok_or(PulseError::InvalidPeriod(steps))
    }

    /// The step count.
    pub const fn get(self) -> u32 {
        self.0.get()
    }

    /// True if `other` divides this period evenly.
    pub fn is_multiple_of(self, other: Period) -> bool {
        self.get() % other.get() == 0
    }

    /// True if this period divides `other` evenly.
    pub fn is_factor_of(self, other: Period) -> bool {
        other.is_multiple_of(self)
    }

    /// The step of a listener at `self` that coincides with step `index` of
    /// a lead at `lead`, if there is one.
    ///
    /// `index * self / lead` must be a whole number for the listener to
    /// fire.
    pub fn derived_step(self, lead: Period, index: u32) -> Option<u32> {
        let scaled = index as u64 * self.get() as u64;
        let lead = lead.get() as u64;
        (scaled % lead == 0).then(|| (scaled / lead) as u32)
    }

    /// Position of step `position` (counted from cycle 0) in cycles.
    ///
    /// The fraction is reduced before dividing, so steps of different
    /// periods that fall on the same instant give the same value bit for
    /// bit.
    pub fn phase_of(self, position: u64) -> f64 {
        let steps = self.get() as u64;
        let g = gcd(position, steps);
        (position / g) as f64 / (steps / g) as f64
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

impl TryFrom<u32> for Period {
    type Error = PulseError;

    fn try_from(steps: u32) -> Result<Self, Self::Error> {
        Self::new(steps)
    }
}

impl From<Period> for u32 {
    fn from(period: Period) -> u32 {
        period.get()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
