//! Bounded most-recent-first event buffer.

use fixhub_core::StreamEvent;
use std::collections::VecDeque;

/// Number of events retained by default.
pub const DEFAULT_CAPACITY: usize = 100;

/// Retains the newest `capacity` events, newest first.
///
/// Ordering is strictly arrival order; timestamps are never consulted.
#[derive(Debug, Clone)]
pub struct EventBuffer {
    events: VecDeque<StreamEvent>,
    capacity: usize,
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBuffer {
    /// Create an empty buffer. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Prepend `event`, dropping the oldest events beyond capacity.
    pub fn push(&mut self, event: StreamEvent) {
        self.events.push_front(event);
        self.events.truncate(self.capacity);
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most recent event, if any.
    pub fn latest(&self) -> Option<&StreamEvent> {
        self.events.front()
    }

    /// Copy of the retained events, newest first.
    pub fn snapshot(&self) -> Vec<StreamEvent> {
        self.events.iter().cloned().collect()
    }
}
