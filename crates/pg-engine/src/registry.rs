//! Ownership and consolidation of pulses.
//!
//! The registry keeps one [`Pulse`] per registered period and arranges
//! them so that as few of them as possible run their own clock. A period
//! that divides a running lead's period is a child of that lead and is
//! served by filtering the lead's ticks. Leads are exactly the registered
//! periods that divide no other registered period.
//!
//! Hierarchy is stored only as children lists on leads. Finding a
//! pulse's parent is a scan over the lead list, which stays short: it is
//! bounded by the number of distinct step counts in use.

use crate::pulse::Pulse;
use crate::validate::InvariantViolation;
use pg_core::{Derivation, ListenerId, Period, PulseError};
use std::collections::BTreeMap;

/// All live pulses and the lead/child structure between them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PulseRegistry {
    pulses: BTreeMap<Period, Pulse>,
    /// Periods of lead pulses, largest first
    leads: Vec<Period>,
}

impl PulseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Queries ---

    pub fn pulse(&self, period: Period) -> Option<&Pulse> {
        self.pulses.get(&period)
    }

    pub fn pulses(&self) -> impl Iterator<Item = &Pulse> {
        self.pulses.values()
    }

    /// Lead periods, largest first.
    pub fn lead_periods(&self) -> &[Period] {
        &self.leads
    }

    /// Lead pulses, in ascending period order.
    pub fn leads_mut(&mut self) -> impl Iterator<Item = &mut Pulse> {
        self.pulses.values_mut().filter(|p| p.is_lead())
    }

    pub fn lead_mut(&mut self, period: Period) -> Option<&mut Pulse> {
        self.pulses.get_mut(&period).filter(|p| p.is_lead())
    }

    /// The lead whose children list contains `period`.
    pub fn parent_of(&self, period: Period) -> Option<Period> {
        self.leads.iter().copied().find(|lead| {
            self.pulses
                .get(lead)
                .is_some_and(|p| p.children().contains(&period))
        })
    }

    /// The lead that drives `period`: the pulse itself when it is a lead,
    /// otherwise its parent.
    pub fn lead_of(&self, period: Period) -> Option<Period> {
        match self.pulses.get(&period) {
            Some(pulse) if pulse.is_lead() => Some(period),
            Some(_) => self.parent_of(period),
            None => None,
        }
    }

    pub fn len(&self) -> usize {
        self.pulses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pulses.is_empty()
    }

    // --- Mutation ---

    /// Subscribe `listener` to a clock of `steps` steps per cycle.
    ///
    /// Returns a routing notice for every listener whose source clock was
    /// decided or changed, including `listener` itself.
    pub fn register(&mut self, listener: ListenerId, steps: u32) -> Result<Vec<Derivation>, PulseError> {
        let period = Period::new(steps)?;

        if let Some(pulse) = self.pulses.get_mut(&period) {
            // Already placed; joining an existing period never moves it.
            pulse.add_listener(listener);
            let derivations = match self.lead_of(period) {
                Some(lead) => vec![Derivation::Derive { listener, period, lead }],
                None => {
                    log::warn!("pulse {} has no lead; re-placing it", period);
                    self.place(period)
                }
            };
            self.debug_validate();
            return Ok(derivations);
        }

        let mut pulse = Pulse::new(period);
        pulse.add_listener(listener);
        self.pulses.insert(period, pulse);
        let derivations = self.place(period);
        self.debug_validate();
        Ok(derivations)
    }

    /// Unsubscribe `listener` from the clock of `steps` steps.
    ///
    /// A period with no live pulse, or a listener that is not subscribed,
    /// is logged and otherwise ignored.
    pub fn deregister(&mut self, listener: ListenerId, steps: u32) -> Vec<Derivation> {
        let Ok(period) = Period::new(steps) else {
            log::warn!("deregister: {} is not a valid period", steps);
            return Vec::new();
        };
        let Some(pulse) = self.pulses.get_mut(&period) else {
            log::warn!("deregister: no pulse for period {}", period);
            return Vec::new();
        };
        if !pulse.has_listener(listener) {
            log::warn!("deregister: {:?} is not subscribed to period {}", listener, period);
            return Vec::new();
        }

        let mut derivations = vec![Derivation::Detach { listener }];
        if !pulse.remove_listener(listener) {
            return derivations;
        }

        if pulse.is_lead() {
            let mut orphans = pulse.take_children();
            self.remove_lead(period);
            self.pulses.remove(&period);
            orphans.sort_unstable_by(|a, b| b.cmp(a));
            if let Some(first) = orphans.first() {
                log::debug!("lead {} vacated, promoting from {:?}", period, first);
            }
            for orphan in orphans {
                derivations.extend(self.place(orphan));
            }
        } else {
            match self.parent_of(period) {
                Some(parent) => {
                    if let Some(p) = self.pulses.get_mut(&parent) {
                        p.remove_child(period);
                    }
                }
                None => log::warn!("deregister: child pulse {} had no parent", period),
            }
            self.pulses.remove(&period);
        }

        self.debug_validate();
        derivations
    }

    /// Move `listener` from `old_steps` to `new_steps`.
    ///
    /// Equivalent to [`deregister`](Self::deregister) followed by
    /// [`register`](Self::register). If registration fails the listener
    /// stays unregistered and the error is returned.
    pub fn update(
        &mut self,
        listener: ListenerId,
        old_steps: u32,
        new_steps: u32,
    ) -> Result<Vec<Derivation>, PulseError> {
        if old_steps == new_steps {
            return Ok(Vec::new());
        }
        let mut derivations = self.deregister(listener, old_steps);
        match self.register(listener, new_steps) {
            Ok(more) => {
                derivations.extend(more);
                Ok(derivations)
            }
            Err(err) => Err(PulseError::UpdateFailed {
                steps: new_steps,
                source: Box::new(err),
            }),
        }
    }

    /// Position a pulse that is in the map but attached nowhere.
    ///
    /// It becomes a child of the largest lead it divides. Failing that it
    /// becomes a lead and absorbs every lead that divides it, flattening
    /// their children into its own.
    fn place(&mut self, period: Period) -> Vec<Derivation> {
        if let Some(parent) = self.largest_lead_multiple(period) {
            let listeners: Vec<ListenerId> = match self.pulses.get(&period) {
                Some(pulse) => pulse.listeners().collect(),
                None => return Vec::new(),
            };
            if let Some(p) = self.pulses.get_mut(&parent) {
                p.add_child(period);
            }
            return listeners
                .into_iter()
                .map(|listener| Derivation::Derive { listener, period, lead: parent })
                .collect();
        }

        let absorbed = self.lead_factors(period);
        if let Some(pulse) = self.pulses.get_mut(&period) {
            pulse.promote();
        }
        self.insert_lead(period);

        for factor in &absorbed {
            self.remove_lead(*factor);
            let grandchildren = match self.pulses.get_mut(factor) {
                Some(pulse) => {
                    let children = pulse.take_children();
                    pulse.demote();
                    children
                }
                None => continue,
            };
            if let Some(lead) = self.pulses.get_mut(&period) {
                for child in grandchildren {
                    lead.add_child(child);
                }
                lead.add_child(*factor);
            }
        }
        if !absorbed.is_empty() {
            log::debug!("lead {} absorbed {:?}", period, absorbed);
        } else {
            log::debug!("lead {} started", period);
        }

        match self.pulses.get(&period) {
            Some(lead) => lead
                .collect_listeners(&self.pulses)
                .into_iter()
                .map(|(listener, own)| Derivation::Derive { listener, period: own, lead: period })
                .collect(),
            None => Vec::new(),
        }
    }

    fn largest_lead_multiple(&self, period: Period) -> Option<Period> {
        self.leads
            .iter()
            .copied()
            .find(|lead| *lead != period && lead.is_multiple_of(period))
    }

    fn lead_factors(&self, period: Period) -> Vec<Period> {
        self.leads
            .iter()
            .copied()
            .filter(|lead| *lead != period && lead.is_factor_of(period))
            .collect()
    }

    fn insert_lead(&mut self, period: Period) {
        if let Err(pos) = self.leads.binary_search_by(|lead| period.cmp(lead)) {
            self.leads.insert(pos, period);
        }
    }

    fn remove_lead(&mut self, period: Period) {
        if let Ok(pos) = self.leads.binary_search_by(|lead| period.cmp(lead)) {
            self.leads.remove(pos);
        }
    }

    // --- Validation ---

    /// Verify the hierarchy: leads sorted and maximal, every child placed
    /// under exactly one lead it divides, children lists flat.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        crate::validate::check(&self.pulses, &self.leads)
    }

    fn debug_validate(&self) {
        if cfg!(debug_assertions) {
            if let Err(violation) = self.check_invariants() {
                panic!("pulse hierarchy broken: {}", violation);
            }
        }
    }
}
