//! One clock per distinct period.

use crate::scheduler::Anchor;
use pg_core::{ListenerId, Period, PulseError, PulseEvent};
use std::collections::{BTreeMap, BTreeSet};

/// Forward-only position of a lead pulse: the next step it will emit and
/// when.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cursor {
    /// Playback clock time of the next step, in seconds
    pub next_time: f64,
    /// Index of the next step: `0..period`
    pub index: u32,
    /// Steps since cycle 0, including completed cycles
    pub position: u64,
}

impl Cursor {
    /// A cursor at step `index` of the first cycle.
    pub const fn new(next_time: f64, index: u32) -> Self {
        Self {
            next_time,
            index,
            position: index as u64,
        }
    }
}

/// Listeners of one period and that period's place in the hierarchy.
///
/// A lead pulse advances against the playback clock and lists the
/// periods deriving from it as children. A child pulse only holds
/// listeners; its ticks are filtered out of its lead's.
#[derive(Clone, Debug, PartialEq)]
pub struct Pulse {
    period: Period,
    listeners: BTreeSet<ListenerId>,
    children: Vec<Period>,
    lead: bool,
    cursor: Option<Cursor>,
}

impl Pulse {
    /// A non-lead pulse with no listeners.
    pub fn new(period: Period) -> Self {
        Self {
            period,
            listeners: BTreeSet::new(),
            children: Vec::new(),
            lead: false,
            cursor: None,
        }
    }

    /// Build a pulse from a raw step count.
    pub fn with_steps(steps: u32) -> Result<Self, PulseError> {
        Period::new(steps).map(Self::new)
    }

    pub fn period(&self) -> Period {
        self.period
    }

    pub fn is_lead(&self) -> bool {
        self.lead
    }

    // --- Listeners ---

    /// Attach a listener. Returns whether the set is empty afterwards,
    /// which is always false.
    pub fn add_listener(&mut self, listener: ListenerId) -> bool {
        self.listeners.insert(listener);
        self.listeners.is_empty()
    }

    /// Detach a listener. Returns whether the set is now empty.
    pub fn remove_listener(&mut self, listener: ListenerId) -> bool {
        self.listeners.remove(&listener);
        self.listeners.is_empty()
    }

    pub fn has_listener(&self, listener: ListenerId) -> bool {
        self.listeners.contains(&listener)
    }

    pub fn listeners(&self) -> impl Iterator<Item = ListenerId> + '_ {
        self.listeners.iter().copied()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Every listener of this pulse and of its descendants, paired with
    /// the period each one registered at.
    ///
    /// Children are looked up in `pulses`; a child missing from the map is
    /// skipped.
    pub fn collect_listeners(&self, pulses: &BTreeMap<Period, Pulse>) -> Vec<(ListenerId, Period)> {
        let mut out: Vec<(ListenerId, Period)> =
            self.listeners().map(|l| (l, self.period)).collect();
        for child in &self.children {
            if let Some(pulse) = pulses.get(child) {
                out.extend(pulse.collect_listeners(pulses));
            }
        }
        out
    }

    // --- Hierarchy ---

    pub fn children(&self) -> &[Period] {
        &self.children
    }

    pub fn add_child(&mut self, child: Period) {
        debug_assert!(self.lead, "children are only kept on lead pulses");
        if !self.children.contains(&child) {
            self.children.push(child);
        }
    }

    pub fn remove_child(&mut self, child: Period) {
        self.children.retain(|c| *c != child);
    }

    pub fn clear_children(&mut self) {
        self.children.clear();
    }

    /// Detach and return the children list.
    pub fn take_children(&mut self) -> Vec<Period> {
        std::mem::take(&mut self.children)
    }

    /// Make this pulse a lead. The cursor starts unseeded.
    pub fn promote(&mut self) {
        self.lead = true;
        self.cursor = None;
    }

    /// Make this pulse a child. Children must be re-parented first; any
    /// left over are dropped along with the cursor.
    pub fn demote(&mut self) {
        self.lead = false;
        self.children.clear();
        self.cursor = None;
    }

    pub fn is_multiple_of(&self, period: Period) -> bool {
        self.period.is_multiple_of(period)
    }

    pub fn is_factor_of(&self, period: Period) -> bool {
        self.period.is_factor_of(period)
    }

    // --- Cursor ---

    pub fn cursor(&self) -> Option<Cursor> {
        self.cursor
    }

    /// Place the cursor. Ignored on non-lead pulses.
    pub fn seed(&mut self, cursor: Cursor) {
        if self.lead {
            self.cursor = Some(cursor);
        }
    }

    pub(crate) fn cursor_mut(&mut self) -> Option<&mut Cursor> {
        self.cursor.as_mut()
    }

    pub fn is_seeded(&self) -> bool {
        self.cursor.is_some()
    }

    /// Enumerate every step due before `now + lookahead`, moving the
    /// cursor past them.
    ///
    /// An unseeded cursor starts at step 0 at `now`. A delayed call
    /// catches up on the whole backlog in order.
    pub fn advance(
        &mut self,
        now: f64,
        lookahead: f64,
        step_duration: f64,
    ) -> Result<Vec<PulseEvent>, PulseError> {
        if !self.lead {
            return Err(PulseError::NotLead(self.period));
        }
        let mut events = Vec::new();
        if !(step_duration.is_finite() && step_duration > 0.0) {
            log::warn!(
                "pulse {}: refusing to advance with step duration {}",
                self.period,
                step_duration
            );
            return Ok(events);
        }

        let period = self.period.get();
        let cursor = self.cursor.get_or_insert(Cursor::new(now, 0));
        let horizon = now + lookahead;
        while cursor.next_time < horizon {
            events.push(PulseEvent {
                index: cursor.index,
                time: cursor.next_time,
            });
            cursor.index = (cursor.index + 1) % period;
            cursor.position += 1;
            cursor.next_time += step_duration;
        }
        Ok(events)
    }

    /// Enumerate every step whose phase lies before `frontier` (in cycles
    /// since the anchor), timing each from `anchor`.
    ///
    /// Steps are compared by [`Period::phase_of`], so a step this pulse
    /// shares with another period falls on the same side of `frontier`
    /// for both. An unseeded cursor starts at the anchor's first step.
    pub fn advance_on(&mut self, anchor: &Anchor, frontier: f64) -> Result<Vec<PulseEvent>, PulseError> {
        if !self.lead {
            return Err(PulseError::NotLead(self.period));
        }
        if !frontier.is_finite() {
            log::warn!("pulse {}: refusing to advance to phase {}", self.period, frontier);
            return Ok(Vec::new());
        }
        let period = self.period;
        let cursor = self.cursor.get_or_insert(anchor.cursor(period, 0));
        let mut events = Vec::new();
        loop {
            let phase = period.phase_of(cursor.position);
            if phase >= frontier {
                cursor.next_time = anchor.time_at(phase);
                break;
            }
            events.push(PulseEvent {
                index: cursor.index,
                time: anchor.time_at(phase),
            });
            cursor.position += 1;
            cursor.index = (cursor.position % period.get() as u64) as u32;
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;
    use slotmap::SlotMap;

    fn p(steps: u32) -> Period {
        Period::new(steps).unwrap()
    }

    fn ids(n: usize) -> Vec<ListenerId> {
        let mut map = SlotMap::<ListenerId, ()>::with_key();
        (0..n).map(|_| map.insert(())).collect()
    }

    fn lead(steps: u32) -> Pulse {
        let mut pulse = Pulse::new(p(steps));
        pulse.promote();
        pulse
    }

    #[test]
    fn construction_rejects_zero() {
        assert_eq!(Pulse::with_steps(0).unwrap_err(), PulseError::InvalidPeriod(0));
        assert_eq!(Pulse::with_steps(5).unwrap().period(), p(5));
    }

    #[test]
    fn listener_membership_reports_emptiness() {
        let ids = ids(2);
        let mut pulse = Pulse::new(p(4));
        assert!(!pulse.add_listener(ids[0]));
        pulse.add_listener(ids[0]);
        assert_eq!(pulse.listener_count(), 1);
        assert!(!pulse.add_listener(ids[1]));
        assert!(!pulse.remove_listener(ids[0]));
        assert!(pulse.remove_listener(ids[1]));
        assert!(!pulse.has_listener(ids[1]));
    }

    #[test]
    fn advance_fills_lookahead_window() {
        let mut pulse = lead(16);
        let events = pulse.advance(0.0, 0.25, 0.1).unwrap();

        assert_eq!(events.len(), 3);
        let indices: Vec<u32> = events.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        for (event, expected) in events.iter().zip([0.0, 0.1, 0.2]) {
            assert!(approx_eq!(f64, event.time, expected, epsilon = 1e-9));
        }
    }

    #[test]
    fn advance_does_not_repeat_emitted_steps() {
        let mut pulse = lead(4);
        let first = pulse.advance(0.0, 0.25, 0.1).unwrap();
        let second = pulse.advance(0.05, 0.25, 0.1).unwrap();
        assert_eq!(first.len(), 3);
        // window now ends at 0.3: only the step at 0.3 is still outside it
        assert!(second.is_empty());
        let third = pulse.advance(0.1, 0.25, 0.1).unwrap();
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].index, 3);
    }

    #[test]
    fn advance_wraps_index() {
        let mut pulse = lead(3);
        let events = pulse.advance(0.0, 0.55, 0.1).unwrap();
        let indices: Vec<u32> = events.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn delayed_advance_catches_up_in_order() {
        let mut pulse = lead(8);
        pulse.advance(0.0, 0.1, 0.1).unwrap();
        let backlog = pulse.advance(1.0, 0.1, 0.1).unwrap();
        // steps at 0.1 ..= 1.0 (cursor arithmetic may land just under 1.1)
        assert!(backlog.len() >= 10);
        assert_eq!(backlog[0].index, 1);
        assert!(backlog.windows(2).all(|w| w[0].time < w[1].time));
    }

    #[test]
    fn advance_requires_lead() {
        let mut pulse = Pulse::new(p(4));
        assert_eq!(pulse.advance(0.0, 0.1, 0.1), Err(PulseError::NotLead(p(4))));
    }

    #[test]
    fn advance_ignores_degenerate_step() {
        let mut pulse = lead(4);
        assert!(pulse.advance(0.0, 1.0, 0.0).unwrap().is_empty());
    }

    #[test]
    fn seeded_cursor_is_respected() {
        let mut pulse = lead(4);
        pulse.seed(Cursor::new(0.5, 2));
        let events = pulse.advance(0.0, 0.6, 0.25).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].index, 2);
    }

    #[test]
    fn advance_on_stops_at_the_frontier_phase() {
        let anchor = Anchor { cycle_start: 2.0, cycle_duration: 1.5 };
        let mut pulse = lead(3);
        let events = pulse.advance_on(&anchor, 1.0).unwrap();
        let indices: Vec<u32> = events.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(approx_eq!(f64, events[2].time, 3.0, epsilon = 1e-12));

        // the downbeat sits exactly on the frontier and is held back
        let cursor = pulse.cursor().unwrap();
        assert_eq!((cursor.position, cursor.index), (3, 0));
        assert_eq!(cursor.next_time, 3.5);

        let next = pulse.advance_on(&anchor, 1.0 + f64::EPSILON).unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].time, 3.5);
        assert!(pulse.advance_on(&anchor, f64::NAN).unwrap().is_empty());
    }

    #[test]
    fn demote_discards_children_and_cursor() {
        let mut pulse = lead(16);
        pulse.add_child(p(8));
        pulse.add_child(p(8));
        pulse.add_child(p(4));
        assert_eq!(pulse.children(), &[p(8), p(4)]);
        pulse.advance(0.0, 0.1, 0.1).unwrap();
        assert!(pulse.cursor().is_some());

        pulse.demote();
        assert!(!pulse.is_lead());
        assert!(pulse.children().is_empty());
        assert!(pulse.cursor().is_none());
        pulse.seed(Cursor::new(0.0, 0));
        assert!(pulse.cursor().is_none());
    }

    #[test]
    fn collect_listeners_walks_children() {
        let ids = ids(3);
        let mut pulses = BTreeMap::new();
        let mut top = lead(12);
        top.add_listener(ids[0]);
        top.add_child(p(6));
        top.add_child(p(4));
        let mut six = Pulse::new(p(6));
        six.add_listener(ids[1]);
        let mut four = Pulse::new(p(4));
        four.add_listener(ids[2]);
        pulses.insert(p(6), six);
        pulses.insert(p(4), four);

        let mut found = top.collect_listeners(&pulses);
        found.sort();
        let mut expected = vec![(ids[0], p(12)), (ids[1], p(6)), (ids[2], p(4))];
        expected.sort();
        assert_eq!(found, expected);
    }
}
