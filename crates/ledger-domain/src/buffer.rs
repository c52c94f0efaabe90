//! Ordered buffer of not-yet-persisted domain events.

use crate::events::DomainEvent;

/// Events recorded by an aggregate and not yet handed to a repository.
///
/// The buffer only grows through [`record`](EventBuffer::record) and only
/// empties through [`drain`](EventBuffer::drain), which returns the whole
/// sequence and resets the buffer in one step. There is no partial drain.
/// Instances are single-owner; aggregates are not shared across threads.
#[derive(Debug, Clone, Default)]
pub struct EventBuffer {
    events: Vec<DomainEvent>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event. No I/O, never fails.
    pub fn record(&mut self, event: DomainEvent) {
        self.events.push(event);
    }

    /// Returns all buffered events in recording order and clears the buffer.
    pub fn drain(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
