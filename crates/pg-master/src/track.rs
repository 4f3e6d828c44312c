//! Track listeners and fan-out to them.

use pg_core::{ListenerId, StepTick};
use pg_engine::TickSink;
use slotmap::SlotMap;

/// Identity of a track inside a [`Transport`](crate::Transport).
pub type TrackId = ListenerId;

/// Something that wants a tick on each of its steps.
///
/// Called on the scheduling thread during fan-out; must not block. Ticks
/// arrive up to one lookahead window before their `time`.
pub trait TickListener {
    fn on_tick(&mut self, tick: StepTick);
}

impl<F: FnMut(StepTick)> TickListener for F {
    fn on_tick(&mut self, tick: StepTick) {
        self(tick)
    }
}

pub(crate) struct Track {
    pub steps: u32,
    pub registered: bool,
    pub listener: Box<dyn TickListener>,
}

#[derive(Default)]
pub(crate) struct Tracks(pub SlotMap<TrackId, Track>);

impl TickSink for Tracks {
    fn deliver(&mut self, listener: ListenerId, tick: StepTick) {
        if let Some(track) = self.0.get_mut(listener) {
            track.listener.on_tick(tick);
        }
    }
}
