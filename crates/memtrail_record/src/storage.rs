//! Append-only event storage in fixed-capacity segments.
//!
//! A segment's buffer is allocated once at full capacity and never grows,
//! so appending never moves events that are already stored.

use memtrail_profile::Event;

/// Default events per segment.
pub const DEFAULT_SEGMENT_LEN: usize = 4096;

pub(crate) struct EventStorage {
    segments: Vec<Vec<Event>>,
    segment_len: usize,
    len: usize,
}

impl EventStorage {
    pub(crate) fn new(segment_len: usize) -> Self {
        Self {
            segments: Vec::new(),
            segment_len: segment_len.max(1),
            len: 0,
        }
    }

    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Appends an event and returns its index.
    pub(crate) fn push(&mut self, event: Event) -> usize {
        let full = self
            .segments
            .last()
            .map_or(true, |segment| segment.len() == self.segment_len);
        if full {
            self.segments.push(Vec::with_capacity(self.segment_len));
        }
        if let Some(segment) = self.segments.last_mut() {
            segment.push(event);
        }
        self.len += 1;
        self.len - 1
    }

    pub(crate) fn get(&self, index: usize) -> Option<&Event> {
        self.segments
            .get(index / self.segment_len)?
            .get(index % self.segment_len)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Event> + '_ {
        self.segments.iter().flatten()
    }

    pub(crate) fn clear(&mut self) {
        self.segments.clear();
        self.len = 0;
    }
}
