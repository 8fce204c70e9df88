//! Shared event queue with per-observer cursors.
//!
//! One copy of each event is stored no matter how many observers exist.
//! Positions are absolute and only grow; `base` is the position of the
//! oldest retained event.

use std::collections::VecDeque;

use crate::event::Event;

pub(crate) struct EventQueue {
    events: VecDeque<Event>,
    /// Absolute position of `events[0]`.
    base: u64,
    /// Next position each observer will read. `None` marks a free slot.
    cursors: Vec<Option<u64>>,
    free_slots: Vec<usize>,
    active: usize,
    max_retained: usize,
}

impl EventQueue {
    pub(crate) fn new(max_retained: usize) -> Self {
        Self {
            events: VecDeque::new(),
            base: 0,
            cursors: Vec::new(),
            free_slots: Vec::new(),
            active: 0,
            max_retained,
        }
    }

    /// Absolute position one past the newest event.
    fn end(&self) -> u64 {
        self.base + self.events.len() as u64
    }

    pub(crate) fn has_observers(&self) -> bool {
        self.active > 0
    }

    /// Registers a cursor positioned after every event queued so far.
    pub(crate) fn register(&mut self) -> usize {
        let end = self.end();
        self.active += 1;
        if let Some(slot) = self.free_slots.pop() {
            self.cursors[slot] = Some(end);
            slot
        } else {
            self.cursors.push(Some(end));
            self.cursors.len() - 1
        }
    }

    pub(crate) fn unregister(&mut self, slot: usize) {
        if let Some(cursor) = self.cursors.get_mut(slot) {
            if cursor.take().is_some() {
                self.active -= 1;
                self.free_slots.push(slot);
            }
        }
        self.prune();
    }

    /// Appends an event. Dropped immediately when nobody is listening.
    pub(crate) fn push(&mut self, event: Event) {
        if self.active == 0 {
            return;
        }
        self.events.push_back(event);
        while self.events.len() > self.max_retained {
            self.events.pop_front();
            self.base += 1;
        }
    }

    /// Copies up to `limit` unread events into `out`.
    ///
    /// Returns `(copied, missed)` where `missed` counts events discarded
    /// by the retention bound before this observer could read them.
    pub(crate) fn read(&mut self, slot: usize, out: &mut Vec<Event>, limit: usize) -> (usize, u64) {
        let Some(Some(cursor)) = self.cursors.get(slot).copied() else {
            return (0, 0);
        };
        let missed = self.base.saturating_sub(cursor);
        let start = cursor.max(self.base);
        let offset = usize::try_from(start - self.base).unwrap_or(usize::MAX);
        let available = self.events.len().saturating_sub(offset);
        let count = available.min(limit);
        out.extend(self.events.range(offset..offset + count).cloned());
        self.cursors[slot] = Some(start + count as u64);
        self.prune();
        (count, missed)
    }

    /// Number of events `slot` has not read yet.
    pub(crate) fn pending(&self, slot: usize) -> usize {
        match self.cursors.get(slot).copied().flatten() {
            Some(cursor) => usize::try_from(self.end() - cursor.max(self.base)).unwrap_or(usize::MAX),
            None => 0,
        }
    }

    /// Drops events every observer has read.
    fn prune(&mut self) {
        let min = self.cursors.iter().flatten().copied().min().unwrap_or_else(|| self.end());
        while self.base < min && !self.events.is_empty() {
            self.events.pop_front();
            self.base += 1;
        }
    }

    #[cfg(test)]
    pub(crate) fn retained(&self) -> usize {
        self.events.len()
    }
}
