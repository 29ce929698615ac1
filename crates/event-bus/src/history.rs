//! Bounded log of recently emitted events.

use std::collections::VecDeque;

use crate::envelope::EventEnvelope;

/// Default number of envelopes retained per bus.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// A ring buffer of the most recent envelopes seen by a bus.
///
/// Used for introspection and replay debugging only; it is never the source
/// of truth for delivery.
#[derive(Debug, Clone)]
pub struct EventHistory {
    entries: VecDeque<EventEnvelope>,
    capacity: usize,
}

impl EventHistory {
    /// Creates a history retaining at most `capacity` envelopes.
    ///
    /// A capacity of zero disables retention.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Appends an envelope, evicting the oldest entries past capacity.
    pub fn push(&mut self, envelope: EventEnvelope) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(envelope);
    }

    /// Returns the most recent envelopes, oldest first.
    ///
    /// `event_type` filters before `limit` is applied, so `limit` always
    /// counts matching entries.
    pub fn recent(&self, event_type: Option<&str>, limit: Option<usize>) -> Vec<EventEnvelope> {
        let matching: Vec<&EventEnvelope> = self
            .entries
            .iter()
            .filter(|e| event_type.is_none_or(|t| e.event_type() == t))
            .collect();

        let skip = limit.map_or(0, |n| matching.len().saturating_sub(n));
        matching.into_iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for EventHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
