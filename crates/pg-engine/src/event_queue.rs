//! FIFO of scheduled ticks for a presentation layer.

use pg_core::ScheduledTick;
use std::collections::VecDeque;

/// Ticks in the order the scheduler produced them.
///
/// Within one scheduling pass the scheduler pushes in time order, so the
/// front of the queue is always the earliest pending tick.
#[derive(Clone, Debug, Default)]
pub struct EventQueue {
    events: VecDeque<ScheduledTick>,
}

impl EventQueue {
    /// Create a new empty event queue.
    pub fn new() -> Self {
        Self { events: VecDeque::new() }
    }

    /// Append a tick to the back of the queue.
    pub fn push(&mut self, event: ScheduledTick) {
        self.events.push_back(event);
    }

    /// Peek at the next tick without removing it.
    pub fn peek(&self) -> Option<&ScheduledTick> {
        self.events.front()
    }

    /// Pop the next tick from the queue.
    pub fn pop(&mut self) -> Option<ScheduledTick> {
        self.events.pop_front()
    }

    /// Pop every tick at the front of the queue whose timestamp is at or
    /// before `time`.
    pub fn pop_until(&mut self, time: f64) -> Vec<ScheduledTick> {
        let mut result = Vec::new();
        while let Some(event) = self.events.front() {
            if event.timestamp <= time {
                result.extend(self.events.pop_front());
            } else {
                break;
            }
        }
        result
    }

    /// Clear all ticks.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Returns the number of ticks in the queue.
    pub fn size(&self) -> usize {
        self.events.len()
    }

    /// Alias of [`size`](Self::size).
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScheduledTick> {
        self.events.iter()
    }
}
