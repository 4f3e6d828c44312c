//! Pulse hierarchy and lookahead scheduling for pulsegrid.
//!
//! [`PulseRegistry`] consolidates per-track step counts into as few
//! independently advancing clocks as divisibility allows, and
//! [`LookaheadScheduler`] turns coarse timer signals into exactly timed
//! steps for every subscribed listener.

mod event_queue;
mod pulse;
mod registry;
pub mod scheduler;
mod validate;

pub use event_queue::EventQueue;
pub use pulse::{Cursor, Pulse};
pub use registry::PulseRegistry;
pub use scheduler::{Anchor, LookaheadScheduler, TickSink};
pub use validate::InvariantViolation;
