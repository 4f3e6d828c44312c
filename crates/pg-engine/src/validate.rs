//! Structural checks over the pulse hierarchy.

use crate::pulse::Pulse;
use pg_core::Period;
use std::collections::BTreeMap;
use thiserror::Error;

/// A broken hierarchy invariant. Correct call sequences never produce one.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("lead list is not strictly descending at {0}")]
    LeadsUnsorted(Period),
    #[error("lead list names {0}, which has no lead pulse")]
    PhantomLead(Period),
    #[error("pulse {0} is flagged lead but missing from the lead list")]
    UnlistedLead(Period),
    #[error("pulse {0} has no listeners")]
    EmptyPulse(Period),
    #[error("lead {lead} divides lead {other}")]
    LeadNotMaximal { lead: Period, other: Period },
    #[error("child {child} does not divide its lead {lead}")]
    IndivisibleChild { lead: Period, child: Period },
    #[error("child {child} of lead {lead} is missing or is itself a lead")]
    BadChild { lead: Period, child: Period },
    #[error("child pulse {0} has children of its own")]
    NestedChildren(Period),
    #[error("pulse {child} is listed under {count} leads")]
    ParentCount { child: Period, count: usize },
}

pub(crate) fn check(pulses: &BTreeMap<Period, Pulse>, leads: &[Period]) -> Result<(), InvariantViolation> {
    for pair in leads.windows(2) {
        if pair[0] <= pair[1] {
            return Err(InvariantViolation::LeadsUnsorted(pair[1]));
        }
    }

    for lead in leads {
        if !pulses.get(lead).is_some_and(Pulse::is_lead) {
            return Err(InvariantViolation::PhantomLead(*lead));
        }
        for other in leads {
            if lead != other && lead.is_factor_of(*other) {
                return Err(InvariantViolation::LeadNotMaximal { lead: *lead, other: *other });
            }
        }
    }

    let mut parents: BTreeMap<Period, usize> = BTreeMap::new();
    for (period, pulse) in pulses {
        if pulse.listener_count() == 0 {
            return Err(InvariantViolation::EmptyPulse(*period));
        }
        if !pulse.is_lead() {
            if !pulse.children().is_empty() {
                return Err(InvariantViolation::NestedChildren(*period));
            }
            continue;
        }
        if !leads.contains(period) {
            return Err(InvariantViolation::UnlistedLead(*period));
        }
        for child in pulse.children() {
            if !pulses.get(child).is_some_and(|c| !c.is_lead()) {
                return Err(InvariantViolation::BadChild { lead: *period, child: *child });
            }
            if child >= period || !child.is_factor_of(*period) {
                return Err(InvariantViolation::IndivisibleChild { lead: *period, child: *child });
            }
            *parents.entry(*child).or_default() += 1;
        }
    }

    for (period, pulse) in pulses {
        if pulse.is_lead() {
            continue;
        }
        let count = parents.get(period).copied().unwrap_or(0);
        if count != 1 {
            return Err(InvariantViolation::ParentCount { child: *period, count });
        }
    }
    Ok(())
}
