//! The append-only display log.

use std::collections::VecDeque;

use crate::DomainEvent;

/// Keeps the most recent events for display, oldest first.
///
/// Bounded: once `capacity` is reached, every push evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct EventLog {
    entries: VecDeque<DomainEvent>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }
}

impl EventLog {
    pub const DEFAULT_CAPACITY: usize = 1_000;

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(Self::DEFAULT_CAPACITY)),
            capacity,
        }
    }

    pub fn push(&mut self, event: DomainEvent) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(event);
    }

    pub fn iter(&self) -> impl Iterator<Item = &DomainEvent> {
        self.entries.iter()
    }

    /// The events a human should see: everything but system plumbing.
    pub fn narratable(&self) -> Vec<DomainEvent> {
        narratable(self.entries.iter()).cloned().collect()
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

/// Filters out system events.
pub fn narratable<'a>(
    events: impl IntoIterator<Item = &'a DomainEvent>,
) -> impl Iterator<Item = &'a DomainEvent> {
    events.into_iter().filter(|event| !event.is_system())
}
