//! Lookahead scheduling.
//!
//! A coarse timer wakes the scheduler every few milliseconds. Each wake-up
//! samples the playback clock and lets every lead pulse enumerate the
//! steps that fall inside `[now, now + lookahead)`. Timing comes from the
//! pulses' own cursors, so a late or bunched wake-up only changes how many
//! steps one pass emits, never when they are due.
//!
//! All leads share one cycle. The scheduler keeps the time at which
//! cycle 0 began (the anchor) and the emitted frontier, measured in cycles
//! since the anchor: every step before it has already gone out. Steps are
//! placed by their exact fraction of the cycle, so the question "was this
//! step emitted" has one answer whichever lead is asked. A lead whose
//! cursor is unseeded (new, promoted or absorbing) starts at its first
//! step at or after the frontier, which keeps re-organised listeners free
//! of gaps and repeats.

use crate::event_queue::EventQueue;
use crate::pulse::Cursor;
use crate::registry::PulseRegistry;
use pg_core::{Derivation, ListenerId, Period, PulseEvent, ScheduledTick, StepTick, TempoProvider};
use std::collections::BTreeMap;

/// Receiver of per-listener ticks during fan-out.
///
/// Implementations run on the scheduling thread and must not block.
pub trait TickSink {
    fn deliver(&mut self, listener: ListenerId, tick: StepTick);
}

impl<F: FnMut(ListenerId, StepTick)> TickSink for F {
    fn deliver(&mut self, listener: ListenerId, tick: StepTick) {
        self(listener, tick)
    }
}

/// Start of cycle 0 and the cycle length it was measured with.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Anchor {
    pub cycle_start: f64,
    pub cycle_duration: f64,
}

impl Anchor {
    /// Cycles elapsed at playback time `time`.
    pub fn phase_at(&self, time: f64) -> f64 {
        (time - self.cycle_start) / self.cycle_duration
    }

    /// Playback time of `phase` cycles.
    pub fn time_at(&self, phase: f64) -> f64 {
        self.cycle_start + phase * self.cycle_duration
    }

    /// A cursor at step `position` of `period`, counted from cycle 0.
    pub fn cursor(&self, period: Period, position: u64) -> Cursor {
        Cursor {
            next_time: self.time_at(period.phase_of(position)),
            index: (position % period.get() as u64) as u32,
            position,
        }
    }

    /// First step of `period` whose phase is not before `frontier`.
    pub fn cursor_at(&self, period: Period, frontier: f64) -> Cursor {
        let steps = period.get() as u64;
        let mut position = (frontier * steps as f64).ceil().max(0.0) as u64;
        // Settle on the exact phase comparison emission uses.
        while position > 0 && period.phase_of(position - 1) >= frontier {
            position -= 1;
        }
        while period.phase_of(position) < frontier {
            position += 1;
        }
        self.cursor(period, position)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Route {
    period: Period,
    lead: Period,
}

/// Drives lead pulses from coarse signals and fans their steps out.
#[derive(Debug)]
pub struct LookaheadScheduler {
    /// Seconds ahead of `now` to enumerate on each signal
    lookahead: f64,
    anchor: Option<Anchor>,
    /// Every step before this many cycles has been emitted
    frontier: f64,
    routes: BTreeMap<ListenerId, Route>,
    queue: EventQueue,
}

impl LookaheadScheduler {
    pub fn new(lookahead: f64) -> Self {
        Self {
            lookahead,
            anchor: None,
            frontier: 0.0,
            routes: BTreeMap::new(),
            queue: EventQueue::new(),
        }
    }

    pub fn lookahead(&self) -> f64 {
        self.lookahead
    }

    pub fn set_lookahead(&mut self, lookahead: f64) {
        self.lookahead = lookahead;
    }

    pub fn anchor(&self) -> Option<Anchor> {
        self.anchor
    }

    /// Emitted frontier in cycles since the anchor.
    pub fn frontier(&self) -> f64 {
        self.frontier
    }

    /// Playback time of the emitted frontier, if running.
    pub fn horizon(&self) -> Option<f64> {
        self.anchor.map(|a| a.time_at(self.frontier))
    }

    pub fn is_running(&self) -> bool {
        self.anchor.is_some()
    }

    /// The presentation queue.
    pub fn events(&mut self) -> &mut EventQueue {
        &mut self.queue
    }

    // --- Routing ---

    /// Apply routing notices from the registry.
    pub fn apply<'a>(&mut self, derivations: impl IntoIterator<Item = &'a Derivation>) {
        for derivation in derivations {
            match *derivation {
                Derivation::Derive { listener, period, lead } => {
                    self.routes.insert(listener, Route { period, lead });
                }
                Derivation::Detach { listener } => {
                    self.routes.remove(&listener);
                }
            }
        }
    }

    /// Stop delivering to `listener`.
    pub fn detach(&mut self, listener: ListenerId) {
        self.routes.remove(&listener);
    }

    /// The listener's own period and the lead it currently derives from.
    pub fn route(&self, listener: ListenerId) -> Option<(Period, Period)> {
        self.routes.get(&listener).map(|r| (r.period, r.lead))
    }

    /// True if every route names the lead the registry would drive that
    /// listener from, and every subscribed listener has a route.
    pub fn routes_match(&self, registry: &PulseRegistry) -> bool {
        let routed = self.routes.iter().all(|(listener, route)| {
            registry.lead_of(route.period) == Some(route.lead)
                && registry
                    .pulse(route.period)
                    .is_some_and(|p| p.has_listener(*listener))
        });
        let covered = registry
            .pulses()
            .flat_map(|p| p.listeners().map(move |l| (l, p.period())))
            .all(|(l, period)| self.routes.get(&l).is_some_and(|r| r.period == period));
        routed && covered
    }

    // --- Transport ---

    /// Anchor cycle 0 at `now` and restart every lead from its first step.
    pub fn start(&mut self, now: f64, tempo: &dyn TempoProvider, registry: &mut PulseRegistry) {
        let anchor = Anchor {
            cycle_start: now,
            cycle_duration: tempo.cycle_duration(),
        };
        self.anchor = Some(anchor);
        self.frontier = 0.0;
        for lead in registry.leads_mut() {
            lead.seed(anchor.cursor(lead.period(), 0));
        }
        log::info!("scheduler started at {:.3}s", now);
    }

    /// Forget the anchor. Already queued ticks stay in the queue.
    pub fn stop(&mut self) {
        self.anchor = None;
    }

    /// Handle one coarse signal at playback time `now`.
    ///
    /// Returns the number of lead steps emitted.
    pub fn on_signal(
        &mut self,
        now: f64,
        tempo: &dyn TempoProvider,
        registry: &mut PulseRegistry,
        sink: &mut dyn TickSink,
    ) -> usize {
        let cycle = tempo.cycle_duration();
        if !(cycle.is_finite() && cycle > 0.0) {
            log::warn!("ignoring signal: cycle duration {} is unusable", cycle);
            return 0;
        }
        let mut anchor = match self.anchor {
            Some(anchor) => anchor,
            None => {
                self.start(now, tempo, registry);
                return self.on_signal(now, tempo, registry, sink);
            }
        };
        if anchor.cycle_duration != cycle {
            anchor = self.retime(now, cycle, registry);
        }
        self.seed_leads(registry);

        let window = anchor.phase_at(now + self.lookahead);
        if window.is_finite() {
            self.frontier = self.frontier.max(window);
        }

        let mut batch: Vec<(Period, PulseEvent)> = Vec::new();
        for lead in registry.leads_mut() {
            let period = lead.period();
            match lead.advance_on(&anchor, self.frontier) {
                Ok(events) => batch.extend(events.into_iter().map(|e| (period, e))),
                Err(err) => log::warn!("skipping lead {}: {}", period, err),
            }
        }
        batch.sort_by(|a, b| a.1.time.total_cmp(&b.1.time).then(b.0.cmp(&a.0)));

        let mut by_lead: BTreeMap<Period, Vec<(ListenerId, Period)>> = BTreeMap::new();
        for (listener, route) in &self.routes {
            by_lead.entry(route.lead).or_default().push((*listener, route.period));
        }

        for (lead, event) in &batch {
            self.queue.push(ScheduledTick {
                step_index: event.index,
                total_steps: lead.get(),
                timestamp: event.time,
            });
            let Some(listeners) = by_lead.get(lead) else {
                continue;
            };
            for (listener, period) in listeners {
                if let Some(step) = period.derived_step(*lead, event.index) {
                    sink.deliver(
                        *listener,
                        StepTick {
                            step,
                            steps: period.get(),
                            time: event.time,
                        },
                    );
                }
            }
        }

        log::trace!("signal at {:.4}s emitted {} steps", now, batch.len());
        batch.len()
    }

    /// Seed every unseeded lead at the frontier.
    fn seed_leads(&mut self, registry: &mut PulseRegistry) {
        let Some(anchor) = self.anchor else {
            return;
        };
        for lead in registry.leads_mut() {
            if !lead.is_seeded() {
                let cursor = anchor.cursor_at(lead.period(), self.frontier);
                log::debug!(
                    "lead {} seeded at step {} ({:.4}s)",
                    lead.period(),
                    cursor.index,
                    cursor.next_time
                );
                lead.seed(cursor);
            }
        }
    }

    /// Stretch the cycle around `now` to last `cycle` seconds. Phases are
    /// unchanged, so only the anchor and pending cursor times move.
    fn retime(&mut self, now: f64, cycle: f64, registry: &mut PulseRegistry) -> Anchor {
        let mut anchor = self.anchor.unwrap_or(Anchor {
            cycle_start: now,
            cycle_duration: cycle,
        });
        let ratio = cycle / anchor.cycle_duration;
        anchor.cycle_start = now + (anchor.cycle_start - now) * ratio;
        anchor.cycle_duration = cycle;
        self.anchor = Some(anchor);
        for lead in registry.leads_mut() {
            let period = lead.period();
            if let Some(cursor) = lead.cursor_mut() {
                cursor.next_time = anchor.time_at(period.phase_of(cursor.position));
            }
        }
        log::debug!("cycle retimed to {:.4}s at {:.4}s", cycle, now);
        anchor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;
    use pg_core::Tempo;
    use slotmap::SlotMap;

    const DT: f64 = 0.025;

    fn p(steps: u32) -> Period {
        Period::new(steps).unwrap()
    }

    fn ids(n: usize) -> Vec<ListenerId> {
        let mut map = SlotMap::<ListenerId, ()>::with_key();
        (0..n).map(|_| map.insert(())).collect()
    }

    /// A tempo with an explicit cycle length.
    struct Cycle(f64);

    impl TempoProvider for Cycle {
        fn cycle_duration(&self) -> f64 {
            self.0
        }
    }

    struct Rig {
        registry: PulseRegistry,
        scheduler: LookaheadScheduler,
        ticks: Vec<(ListenerId, StepTick)>,
    }

    impl Rig {
        fn new(lookahead: f64) -> Self {
            Self {
                registry: PulseRegistry::new(),
                scheduler: LookaheadScheduler::new(lookahead),
                ticks: Vec::new(),
            }
        }

        fn register(&mut self, listener: ListenerId, steps: u32) {
            let derivations = self.registry.register(listener, steps).unwrap();
            self.scheduler.apply(&derivations);
        }

        fn deregister(&mut self, listener: ListenerId, steps: u32) {
            let derivations = self.registry.deregister(listener, steps);
            self.scheduler.apply(&derivations);
        }

        fn signal(&mut self, now: f64, tempo: &dyn TempoProvider) -> usize {
            let ticks = &mut self.ticks;
            let mut sink = |l: ListenerId, t: StepTick| ticks.push((l, t));
            self.scheduler.on_signal(now, tempo, &mut self.registry, &mut sink)
        }

        /// Signals at every multiple of DT in `[from, to)`.
        fn run(&mut self, from: usize, to: usize, tempo: &dyn TempoProvider) {
            for i in from..to {
                self.signal(i as f64 * DT, tempo);
            }
        }

        fn ticks_of(&self, listener: ListenerId) -> Vec<StepTick> {
            self.ticks.iter().filter(|(l, _)| *l == listener).map(|(_, t)| *t).collect()
        }
    }

    /// Assert `ticks` lie exactly on the grid of `steps` per `cycle`,
    /// consecutive, with no repeats.
    fn assert_contiguous(ticks: &[StepTick], steps: u32, cycle: f64) {
        let step = cycle / steps as f64;
        let first = (ticks[0].time / step).round() as u64;
        for (n, tick) in ticks.iter().enumerate() {
            let k = first + n as u64;
            assert!(
                approx_eq!(f64, tick.time, k as f64 * step, epsilon = 1e-9),
                "tick {} at {} is off the grid (expected {})",
                n,
                tick.time,
                k as f64 * step
            );
            assert_eq!(tick.step, (k % steps as u64) as u32);
            assert_eq!(tick.steps, steps);
        }
    }

    #[test]
    fn cursor_at_rounds_up_to_the_grid() {
        let anchor = Anchor { cycle_start: 1.0, cycle_duration: 2.0 };
        let c = anchor.cursor_at(p(4), 0.3);
        assert!(approx_eq!(f64, c.next_time, 2.0, epsilon = 1e-12));
        assert_eq!((c.index, c.position), (2, 2));

        let exact = anchor.cursor_at(p(4), 0.5);
        assert_eq!(exact.position, 2);

        let wrapped = anchor.cursor_at(p(4), 1.05);
        assert_eq!((wrapped.index, wrapped.position), (1, 5));
        assert!(approx_eq!(f64, wrapped.next_time, 3.5, epsilon = 1e-12));

        let before = anchor.cursor_at(p(4), -0.5);
        assert_eq!(before, Cursor::new(1.0, 0));
    }

    #[test]
    fn cursor_at_agrees_with_other_periods_on_shared_steps() {
        let anchor = Anchor { cycle_start: 0.0, cycle_duration: 1.0 };
        let frontier = p(6).phase_of(6);
        assert_eq!(anchor.cursor_at(p(3), frontier).position, 3);
        assert_eq!(anchor.cursor_at(p(6), frontier).position, 6);
        assert_eq!(anchor.cursor_at(p(6), p(6).phase_of(5)).position, 5);
    }

    #[test]
    fn child_listener_fires_on_coinciding_steps() {
        let ids = ids(2);
        let mut rig = Rig::new(1.55);
        rig.register(ids[0], 16);
        rig.register(ids[1], 4);
        let tempo = Cycle(1.6);
        rig.scheduler.start(0.0, &tempo, &mut rig.registry);

        let emitted = rig.signal(0.0, &tempo);

        assert_eq!(emitted, 16);
        let lead_steps: Vec<u32> = rig.ticks_of(ids[0]).iter().map(|t| t.step).collect();
        assert_eq!(lead_steps, (0..16).collect::<Vec<_>>());
        let child = rig.ticks_of(ids[1]);
        assert_eq!(child.iter().map(|t| t.step).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert!(approx_eq!(f64, child[3].time, 1.2, epsilon = 1e-9));
        assert!(child.iter().all(|t| t.steps == 4));
    }

    #[test]
    fn queue_receives_every_lead_step_in_time_order() {
        let ids = ids(2);
        let mut rig = Rig::new(0.5);
        rig.register(ids[0], 3);
        rig.register(ids[1], 4);
        let tempo = Cycle(1.2);
        rig.scheduler.start(0.0, &tempo, &mut rig.registry);
        rig.signal(0.0, &tempo);

        let queue = rig.scheduler.events();
        // period 3: 0.0, 0.4; period 4: 0.0, 0.3
        assert_eq!(queue.size(), 4);
        let order: Vec<(u32, u32)> = queue.iter().map(|t| (t.total_steps, t.step_index)).collect();
        assert_eq!(order, vec![(4, 0), (3, 0), (4, 1), (3, 1)]);
    }

    #[test]
    fn delayed_signal_catches_up_without_skipping() {
        let ids = ids(1);
        let mut rig = Rig::new(0.1);
        rig.register(ids[0], 4);
        let tempo = Cycle(2.0);
        rig.scheduler.start(0.0, &tempo, &mut rig.registry);

        rig.signal(0.0, &tempo);
        rig.signal(3.0, &tempo);

        let ticks = rig.ticks_of(ids[0]);
        // 0.0, 0.5, ..., 3.0
        assert_eq!(ticks.len(), 7);
        assert_contiguous(&ticks, 4, 2.0);
    }

    #[test]
    fn absorption_mid_play_keeps_existing_listener_contiguous() {
        let ids = ids(2);
        let mut rig = Rig::new(0.1);
        let tempo = Cycle(2.0);
        rig.register(ids[0], 4);
        rig.scheduler.start(0.0, &tempo, &mut rig.registry);

        rig.run(0, 24, &tempo);
        rig.register(ids[1], 8);
        assert_eq!(rig.registry.lead_periods(), &[p(8)]);
        rig.run(24, 160, &tempo);

        let old = rig.ticks_of(ids[0]);
        assert_eq!(old.len(), 9);
        assert_contiguous(&old, 4, 2.0);

        let new = rig.ticks_of(ids[1]);
        assert_contiguous(&new, 8, 2.0);
        // registered with the horizon at 0.675: first eighth at or after it
        assert!(approx_eq!(f64, new[0].time, 0.75, epsilon = 1e-9));
        assert_eq!(new[0].step, 3);
        assert!(rig.scheduler.routes_match(&rig.registry));
    }

    #[test]
    fn promotion_mid_play_keeps_child_contiguous() {
        let ids = ids(2);
        let mut rig = Rig::new(0.1);
        let tempo = Cycle(2.0);
        rig.register(ids[0], 8);
        rig.register(ids[1], 4);
        rig.scheduler.start(0.0, &tempo, &mut rig.registry);

        rig.run(0, 41, &tempo);
        rig.deregister(ids[0], 8);
        assert_eq!(rig.registry.lead_periods(), &[p(4)]);
        rig.run(41, 160, &tempo);

        let child = rig.ticks_of(ids[1]);
        assert_eq!(child.len(), 9);
        assert_contiguous(&child, 4, 2.0);
        let lead = rig.ticks_of(ids[0]);
        assert!(lead.iter().all(|t| t.time < 1.2));
    }

    #[test]
    fn detached_listener_goes_quiet() {
        let ids = ids(2);
        let mut rig = Rig::new(0.1);
        let tempo = Cycle(2.0);
        rig.register(ids[0], 4);
        rig.register(ids[1], 4);
        rig.scheduler.start(0.0, &tempo, &mut rig.registry);
        rig.run(0, 10, &tempo);
        rig.deregister(ids[1], 4);
        rig.run(10, 80, &tempo);

        assert_eq!(rig.ticks_of(ids[0]).len(), 5);
        assert_eq!(rig.ticks_of(ids[1]).len(), 1);
        assert_eq!(rig.scheduler.route(ids[1]), None);
        assert_eq!(rig.scheduler.route(ids[0]), Some((p(4), p(4))));
    }

    #[test]
    fn tempo_change_rescales_pending_steps() {
        let ids = ids(1);
        let mut rig = Rig::new(0.1);
        rig.register(ids[0], 4);
        rig.scheduler.start(0.0, &Cycle(2.0), &mut rig.registry);

        rig.run(0, 40, &Cycle(2.0));
        rig.run(40, 80, &Cycle(1.0));

        let ticks = rig.ticks_of(ids[0]);
        let steps: Vec<u32> = ticks.iter().map(|t| t.step).collect();
        assert_eq!(steps, vec![0, 1, 2, 3, 0, 1, 2]);
        assert!(ticks.windows(2).all(|w| w[0].time < w[1].time));
        // the step pending at 1.5 is pulled in to 1.25 by the change at 1.0
        assert!(approx_eq!(f64, ticks[3].time, 1.25, epsilon = 1e-9));
        let gaps: Vec<f64> = ticks.windows(2).map(|w| w[1].time - w[0].time).collect();
        assert!(approx_eq!(f64, *gaps.last().unwrap(), 0.25, epsilon = 1e-9));
    }

    #[test]
    fn signal_without_start_anchors_at_now() {
        let ids = ids(1);
        let mut rig = Rig::new(0.1);
        rig.register(ids[0], 2);
        let tempo = Tempo::new(120.0, 4);

        rig.signal(5.0, &tempo);

        assert!(rig.scheduler.is_running());
        let ticks = rig.ticks_of(ids[0]);
        assert_eq!(ticks.len(), 1);
        assert!(approx_eq!(f64, ticks[0].time, 5.0, epsilon = 1e-12));
    }

    #[test]
    fn unusable_tempo_emits_nothing() {
        let ids = ids(1);
        let mut rig = Rig::new(0.1);
        rig.register(ids[0], 2);
        assert_eq!(rig.signal(0.0, &Cycle(0.0)), 0);
        assert!(rig.ticks.is_empty());
    }

    /// Register `a` and `b` (a divides b), play, then reorganise after
    /// signal `switch`: either `b` arrives and absorbs `a`, or `b` leaves
    /// and `a` is promoted. Returns the ticks heard by `a`'s listener.
    fn reorganise(a: u32, b: u32, cycle: f64, switch: usize, absorb: bool) -> Vec<StepTick> {
        let ids = ids(2);
        let mut rig = Rig::new(0.1);
        let tempo = Cycle(cycle);
        rig.register(ids[0], a);
        if !absorb {
            rig.register(ids[1], b);
        }
        rig.scheduler.start(0.0, &tempo, &mut rig.registry);
        rig.run(0, switch, &tempo);
        if absorb {
            rig.register(ids[1], b);
        } else {
            rig.deregister(ids[1], b);
        }
        rig.run(switch, 160, &tempo);
        rig.ticks_of(ids[0])
    }

    #[test]
    fn reorganising_on_a_window_edge_neither_repeats_nor_skips() {
        // 25ms signals with a 100ms lookahead put the window edge on
        // downbeats of these non-dyadic periods.
        for (a, b) in [(3, 6), (3, 12), (5, 10), (6, 12), (3, 9), (7, 14)] {
            for cycle in [1.0, 0.6, 1.5] {
                for switch in 1..120 {
                    for absorb in [true, false] {
                        let ticks = reorganise(a, b, cycle, switch, absorb);
                        let expected = ((159.0 * DT + 0.1) / cycle * a as f64).ceil() as usize;
                        assert_eq!(ticks.len(), expected, "{a}/{b} cycle {cycle} switch {switch}");
                        assert!(ticks.windows(2).all(|w| w[0].time < w[1].time));
                        assert_contiguous(&ticks, a, cycle);
                    }
                }
            }
        }
    }

    #[test]
    fn promoted_thirds_do_not_repeat_the_downbeat() {
        // signal 36 ends its window exactly on the second downbeat
        let ticks = reorganise(3, 6, 1.0, 37, false);
        let downbeats: Vec<f64> = ticks.iter().filter(|t| t.step == 0).map(|t| t.time).collect();
        assert_eq!(downbeats.len(), 5);
        assert!(downbeats.windows(2).all(|w| approx_eq!(f64, w[1] - w[0], 1.0, epsilon = 1e-9)));
    }
}
