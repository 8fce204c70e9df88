//! # Memory Recording Track
//!
//! An append-only history of profiling events plus the group totals at a
//! movable cursor.
//!
//! ## Lifecycle
//!
//! ```text
//! Empty ──begin_capture / begin_deserialize──► Populating ──end──► Idle
//!                                                  ▲                │
//!                                                  └────begin_*─────┘
//! ```
//!
//! Starting a new session discards the previous content. Events are
//! validated on append (known group, totals stay consistent), so moving the
//! cursor over them can never fail.
//!
//! The cursor counts applied events: position `n` shows the state after
//! events `0..n`. Appending does not move the cursor.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use memtrail_profile::{
    Event, EventPayload, GroupDeclaration, GroupId, GroupSnapshot, GroupStats, Observer, Profiler,
    Totals,
};

use crate::codec::{GroupDirectory, Record, TrackReader, TrackWriter};
use crate::config::TrackConfig;
use crate::error::{ReadStatus, TrackError, TrackResult};
use crate::storage::{EventStorage, DEFAULT_SEGMENT_LEN};

/// Group name-path to its own and inclusive totals.
pub type GroupStateMap = BTreeMap<Arc<str>, GroupStats>;

/// Where a track is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackState {
    /// Nothing recorded yet.
    Empty,
    /// A capture or deserialization session is appending events.
    Populating,
    /// Content is complete and queryable.
    Idle,
}

impl fmt::Display for TrackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Empty => "empty",
            Self::Populating => "populating",
            Self::Idle => "idle",
        })
    }
}

/// A group as reconstructed from the event history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedAllocationGroup {
    declaration: GroupDeclaration,
    declared_at: Option<usize>,
    own: Totals,
    inclusive: Totals,
}

impl RecordedAllocationGroup {
    fn new(declaration: GroupDeclaration, declared_at: Option<usize>) -> Self {
        Self {
            declaration,
            declared_at,
            own: Totals::ZERO,
            inclusive: Totals::ZERO,
        }
    }

    /// Group id from the recorded profiler.
    #[must_use]
    pub const fn id(&self) -> GroupId {
        self.declaration.id
    }

    /// Parent id. `None` for the root.
    #[must_use]
    pub const fn parent(&self) -> Option<GroupId> {
        self.declaration.parent
    }

    /// Full name-path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.declaration.path
    }

    /// Identity and tree position.
    #[must_use]
    pub const fn declaration(&self) -> &GroupDeclaration {
        &self.declaration
    }

    /// Index of the declaring event. `None` for the implicit root.
    #[must_use]
    pub const fn declared_at(&self) -> Option<usize> {
        self.declared_at
    }

    /// Totals at the cursor, this group only.
    #[must_use]
    pub const fn own(&self) -> Totals {
        self.own
    }

    /// Totals at the cursor, descendants included.
    #[must_use]
    pub const fn inclusive(&self) -> Totals {
        self.inclusive
    }

    /// Both totals at the cursor.
    #[must_use]
    pub const fn stats(&self) -> GroupStats {
        GroupStats {
            own: self.own,
            inclusive: self.inclusive,
        }
    }

    fn visible_at(&self, position: usize) -> bool {
        self.declared_at.map_or(true, |index| index < position)
    }
}

/// A marker event and where it sits in the track.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MarkerEntry {
    /// Index of the marker event.
    pub position: usize,
    /// Group that was on top when the marker was set.
    pub group: GroupId,
    /// Marker value.
    pub value: u64,
    /// Marker timestamp.
    pub timestamp: u64,
}

enum Session {
    Capture {
        observer: Observer,
        /// Polled events not yet appended.
        buffer: Vec<Event>,
        /// `observer.missed()` as of the last poll.
        missed: u64,
    },
    Deserialize(TrackReader<Box<dyn Read + Send>>),
}

/// Recorded memory usage history.
pub struct Track {
    events: EventStorage,
    groups: Vec<RecordedAllocationGroup>,
    index: HashMap<GroupId, usize>,
    /// Own totals after the last event, parallel to `groups`.
    tail: Vec<Totals>,
    markers: Vec<usize>,
    cursor: usize,
    status: TrackState,
    session: Option<Session>,
}

impl Track {
    /// Creates an empty track.
    #[must_use]
    pub fn new() -> Self {
        Self::with_segment_len(DEFAULT_SEGMENT_LEN)
    }

    /// Creates an empty track with the given storage settings.
    ///
    /// # Errors
    ///
    /// Returns [`TrackError::InvalidConfig`] for an unusable configuration.
    pub fn with_config(config: &TrackConfig) -> TrackResult<Self> {
        config.validate()?;
        Ok(Self::with_segment_len(config.segment_len))
    }

    fn with_segment_len(segment_len: usize) -> Self {
        let mut track = Self {
            events: EventStorage::new(segment_len),
            groups: Vec::new(),
            index: HashMap::new(),
            tail: Vec::new(),
            markers: Vec::new(),
            cursor: 0,
            status: TrackState::Empty,
            session: None,
        };
        track.reset();
        track
    }

    fn reset(&mut self) {
        self.events.clear();
        self.groups.clear();
        self.index.clear();
        self.tail.clear();
        self.markers.clear();
        self.cursor = 0;
        let root = GroupDeclaration {
            id: GroupId::ROOT,
            parent: None,
            path: Arc::from(""),
        };
        self.insert_group(root, None);
    }

    fn insert_group(&mut self, declaration: GroupDeclaration, declared_at: Option<usize>) {
        self.index.insert(declaration.id, self.groups.len());
        self.groups.push(RecordedAllocationGroup::new(declaration, declared_at));
        self.tail.push(Totals::ZERO);
    }

    const fn invalid(&self, operation: &'static str) -> TrackError {
        TrackError::InvalidState {
            operation,
            state: self.status,
        }
    }

    /// Lifecycle state.
    #[must_use]
    pub const fn status(&self) -> TrackState {
        self.status
    }

    // =========================================================================
    // Population
    // =========================================================================

    /// Starts recording a live profiler.
    ///
    /// The current group tree becomes declaration events, and totals that
    /// already exist become seed `Allocate`/`Acquire` events, all with
    /// sequence and timestamp zero. Every later change arrives through the
    /// bound observer; see [`Track::pump`].
    ///
    /// # Errors
    ///
    /// Returns [`TrackError::InvalidState`] while another session is open.
    pub fn begin_capture(&mut self, profiler: &Profiler) -> TrackResult<()> {
        if self.status == TrackState::Populating {
            return Err(self.invalid("begin a capture"));
        }
        self.reset();
        let (snapshot, observer) = profiler.observe_with_snapshot();
        for event in seed_events(&snapshot) {
            self.append(event)?;
        }

        tracing::debug!(groups = snapshot.len(), seeded = self.events.len(), "capture started");
        let missed = observer.missed();
        self.session = Some(Session::Capture {
            observer,
            buffer: Vec::new(),
            missed,
        });
        self.status = TrackState::Populating;
        Ok(())
    }

    /// Appends one event.
    ///
    /// Allowed while populating, and on an empty track, which then counts
    /// as populating until [`Track::end_capture`].
    ///
    /// # Errors
    ///
    /// - [`TrackError::InvalidState`] on an idle track.
    /// - [`TrackError::UnknownGroup`] if the group (or a declared group's
    ///   parent) is unknown.
    /// - [`TrackError::Accounting`] if an operation breaks the group totals.
    pub fn report_event(&mut self, event: Event) -> TrackResult<ReadStatus> {
        match self.status {
            TrackState::Idle => return Err(self.invalid("report an event")),
            TrackState::Empty => self.status = TrackState::Populating,
            TrackState::Populating => {}
        }
        let appended = self.append(event)?;
        Ok(self.read_status(appended))
    }

    fn read_status(&self, appended: bool) -> ReadStatus {
        let last = self.events.len().checked_sub(1);
        match last.and_then(|index| self.events.get(index)) {
            Some(event) if appended => ReadStatus::Event(event.clone()),
            _ => ReadStatus::Skipped,
        }
    }

    /// Validates and stores one event. False for a repeated declaration.
    fn append(&mut self, event: Event) -> TrackResult<bool> {
        let position = self.events.len();
        match &event.payload {
            EventPayload::Declared { parent, path } => {
                if let Some(&slot) = self.index.get(&event.group) {
                    if self.groups[slot].path() == &**path {
                        return Ok(false);
                    }
                    return Err(TrackError::DuplicateGroup(event.group));
                }
                let parent = parent.unwrap_or(GroupId::ROOT);
                if !self.index.contains_key(&parent) {
                    return Err(TrackError::UnknownGroup(parent));
                }
                let declaration = GroupDeclaration {
                    id: event.group,
                    parent: Some(parent),
                    path: Arc::clone(path),
                };
                self.insert_group(declaration, Some(position));
            }
            EventPayload::Marker(_) => {
                if !self.index.contains_key(&event.group) {
                    return Err(TrackError::UnknownGroup(event.group));
                }
                self.markers.push(position);
            }
            EventPayload::Allocate(amount)
            | EventPayload::Acquire(amount)
            | EventPayload::Release(amount)
            | EventPayload::Free(amount) => {
                let slot = *self
                    .index
                    .get(&event.group)
                    .ok_or(TrackError::UnknownGroup(event.group))?;
                self.tail[slot] = self.tail[slot].apply(event.group, event.kind(), *amount)?;
            }
        }
        self.events.push(event);
        Ok(true)
    }

    /// Moves every event the capture observer has seen into the track.
    /// Returns how many were taken.
    ///
    /// # Errors
    ///
    /// - [`TrackError::InvalidState`] if no capture is open.
    /// - [`TrackError::EventsMissed`] if the profiler dropped events before
    ///   the observer read them. The capture is closed and the track keeps
    ///   the events before the gap.
    /// - Any [`Track::report_event`] error. The failing event is dropped;
    ///   events after it stay buffered for the next pump.
    pub fn pump(&mut self) -> TrackResult<usize> {
        let buffered = self.drain_buffer()?;
        let lost = match &mut self.session {
            Some(Session::Capture {
                observer,
                buffer,
                missed,
            }) => {
                observer.poll(buffer);
                let lost = observer.missed() - *missed;
                *missed = observer.missed();
                lost
            }
            _ => 0,
        };
        if lost > 0 {
            self.session = None;
            self.status = TrackState::Idle;
            tracing::warn!(lost, events = self.events.len(), "capture lost events and was closed");
            return Err(TrackError::EventsMissed { count: lost });
        }
        Ok(buffered + self.drain_buffer()?)
    }

    /// Appends the capture buffer in order. On failure the events after
    /// the failing one are put back.
    fn drain_buffer(&mut self) -> TrackResult<usize> {
        let state = self.status;
        let batch = match &mut self.session {
            Some(Session::Capture { buffer, .. }) => std::mem::take(buffer),
            _ => {
                return Err(TrackError::InvalidState {
                    operation: "pump",
                    state,
                })
            }
        };
        let mut applied = 0;
        let mut pending = batch.into_iter();
        let result: TrackResult<()> = pending.by_ref().try_for_each(|event| {
            self.append(event)?;
            applied += 1;
            Ok(())
        });
        if let Err(error) = result {
            if let Some(Session::Capture { buffer, .. }) = &mut self.session {
                buffer.extend(pending);
            }
            return Err(error);
        }
        Ok(applied)
    }

    /// Drains the observer one last time and closes the session.
    ///
    /// Also closes a session opened by [`Track::report_event`] on an empty
    /// track. Returns the number of events taken in the final drain.
    ///
    /// # Errors
    ///
    /// - [`TrackError::InvalidState`] if the track is not capturing.
    /// - Errors from the final [`Track::pump`]. The session is closed anyway.
    pub fn end_capture(&mut self) -> TrackResult<usize> {
        if self.status != TrackState::Populating || matches!(self.session, Some(Session::Deserialize(_))) {
            return Err(self.invalid("end a capture"));
        }
        let result = if self.session.is_some() { self.pump() } else { Ok(0) };
        self.session = None;
        self.status = TrackState::Idle;
        tracing::debug!(events = self.events.len(), groups = self.groups.len(), "capture ended");
        result
    }

    /// Starts decoding a track stream. Reads and checks the header now.
    ///
    /// # Errors
    ///
    /// - [`TrackError::InvalidState`] while another session is open.
    /// - Header errors from [`TrackReader::new`]. The track is unchanged.
    pub fn begin_deserialize<R>(&mut self, reader: R) -> TrackResult<()>
    where
        R: Read + Send + 'static,
    {
        if self.status == TrackState::Populating {
            return Err(self.invalid("begin deserializing"));
        }
        let reader = TrackReader::new(Box::new(reader) as Box<dyn Read + Send>)?;
        self.reset();
        self.session = Some(Session::Deserialize(reader));
        self.status = TrackState::Populating;
        Ok(())
    }

    /// Decodes and appends one record, returning the appended event as
    /// [`ReadStatus::Event`].
    ///
    /// [`ReadStatus::EndOfStream`] closes the session. Errors close it too;
    /// events read before the error stay in the track.
    ///
    /// # Errors
    ///
    /// - [`TrackError::InvalidState`] if no deserialization is open.
    /// - Stream errors from [`TrackReader::next_record`].
    /// - Validation errors as for [`Track::report_event`].
    pub fn try_read_next_event(&mut self) -> TrackResult<ReadStatus> {
        let state = self.status;
        let Some(Session::Deserialize(reader)) = &mut self.session else {
            return Err(TrackError::InvalidState {
                operation: "read events",
                state,
            });
        };
        let bytes = reader.offset();
        let outcome = match reader.next_record() {
            Ok(None) => {
                self.session = None;
                self.status = TrackState::Idle;
                tracing::info!(
                    events = self.events.len(),
                    groups = self.groups.len(),
                    bytes,
                    "track loaded"
                );
                return Ok(ReadStatus::EndOfStream);
            }
            Ok(Some(Record::Unknown { tag, offset })) => {
                tracing::debug!(tag, offset, "skipped unknown record");
                Ok(ReadStatus::Skipped)
            }
            Ok(Some(Record::Event(event))) => self.append(event).map(|appended| self.read_status(appended)),
            Err(error) => Err(error),
        };
        if let Err(error) = &outcome {
            tracing::warn!(%error, offset = bytes, "track stream rejected");
            self.session = None;
            self.status = TrackState::Idle;
        }
        outcome
    }

    /// Reads up to `budget` records. Returns true once the stream has ended.
    ///
    /// # Errors
    ///
    /// Same as [`Track::try_read_next_event`].
    pub fn read_slice(&mut self, budget: usize) -> TrackResult<bool> {
        for _ in 0..budget {
            if self.try_read_next_event()? == ReadStatus::EndOfStream {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Decodes a whole stream into a new track.
    ///
    /// # Errors
    ///
    /// Any error from [`Track::begin_deserialize`] or
    /// [`Track::try_read_next_event`].
    pub fn deserialize<R>(reader: R) -> TrackResult<Self>
    where
        R: Read + Send + 'static,
    {
        let mut track = Self::new();
        track.begin_deserialize(reader)?;
        while track.try_read_next_event()? != ReadStatus::EndOfStream {}
        Ok(track)
    }

    /// Encodes every event through `writer`.
    ///
    /// # Errors
    ///
    /// Any error from [`TrackWriter::serialize_event`].
    pub fn serialize<W: Write>(&self, writer: &mut TrackWriter<W>) -> TrackResult<()> {
        self.events
            .iter()
            .try_for_each(|event| writer.serialize_event(event, self))
    }

    /// Writes a complete stream, header included, and returns the writer.
    ///
    /// # Errors
    ///
    /// Any I/O or encoding error.
    pub fn write_to<W: Write>(&self, inner: W) -> TrackResult<W> {
        let mut writer = TrackWriter::new(inner)?;
        self.serialize(&mut writer)?;
        writer.into_inner()
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// Number of events.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.events.len()
    }

    /// True if the track holds no events.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.events.len() == 0
    }

    /// Storage segments in use.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.events.segment_count()
    }

    /// Cursor position: the number of events applied.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.cursor
    }

    /// Event at `index`.
    #[must_use]
    pub fn event(&self, index: usize) -> Option<&Event> {
        self.events.get(index)
    }

    /// All events in order.
    pub fn events(&self) -> impl Iterator<Item = &Event> + '_ {
        self.events.iter()
    }

    /// Applies the event under the cursor. False at the end.
    pub fn move_to_next_event(&mut self) -> bool {
        if self.cursor >= self.events.len() {
            return false;
        }
        self.step(self.cursor, true);
        self.cursor += 1;
        true
    }

    /// Undoes the event before the cursor. False at the start.
    pub fn move_to_previous_event(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        self.step(self.cursor, false);
        true
    }

    /// Moves the cursor to `position`, clamped to the track length.
    /// Returns the new position.
    pub fn seek(&mut self, position: usize) -> usize {
        let target = position.min(self.events.len());
        while self.cursor < target && self.move_to_next_event() {}
        while self.cursor > target && self.move_to_previous_event() {}
        self.cursor
    }

    fn step(&mut self, index: usize, forward: bool) {
        let Some(event) = self.events.get(index) else { return };
        let (group, kind) = (event.group, event.kind());
        let Some(amount) = event.bytes() else { return };
        let kind = if forward { kind } else { kind.inverse() };
        let Some(&slot) = self.index.get(&group) else { return };

        // Append-time validation guarantees every step applies cleanly.
        let record = &mut self.groups[slot];
        let Ok(own) = record.own.apply(group, kind, amount) else { return };
        record.own = own;

        let mut cursor = Some(slot);
        while let Some(slot) = cursor {
            let record = &mut self.groups[slot];
            if let Ok(inclusive) = record.inclusive.apply(record.declaration.id, kind, amount) {
                record.inclusive = inclusive;
            }
            cursor = record
                .declaration
                .parent
                .and_then(|parent| self.index.get(&parent).copied());
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Group totals at the cursor.
    #[must_use]
    pub fn state(&self) -> GroupStateMap {
        self.groups
            .iter()
            .filter(|group| group.visible_at(self.cursor))
            .map(|group| (Arc::clone(&group.declaration.path), group.stats()))
            .collect()
    }

    /// Group totals after the first `position` events, computed from
    /// scratch. Does not move the cursor.
    #[must_use]
    pub fn state_at(&self, position: usize) -> GroupStateMap {
        let position = position.min(self.events.len());
        let mut own = vec![Totals::ZERO; self.groups.len()];
        for event in self.events.iter().take(position) {
            let (Some(amount), Some(&slot)) = (event.bytes(), self.index.get(&event.group)) else {
                continue;
            };
            if let Ok(next) = own[slot].apply(event.group, event.kind(), amount) {
                own[slot] = next;
            }
        }

        // Parents always occupy lower slots than their children.
        let mut inclusive = own.clone();
        for slot in (1..self.groups.len()).rev() {
            let Some(parent) = self.groups[slot]
                .declaration
                .parent
                .and_then(|parent| self.index.get(&parent).copied())
            else {
                continue;
            };
            let child = inclusive[slot];
            inclusive[parent].reserved += child.reserved;
            inclusive[parent].used += child.used;
        }

        self.groups
            .iter()
            .enumerate()
            .filter(|(_, group)| group.visible_at(position))
            .map(|(slot, group)| {
                (
                    Arc::clone(&group.declaration.path),
                    GroupStats {
                        own: own[slot],
                        inclusive: inclusive[slot],
                    },
                )
            })
            .collect()
    }

    /// Every marker in order.
    #[must_use]
    pub fn markers(&self) -> Vec<MarkerEntry> {
        self.markers
            .iter()
            .filter_map(|&position| {
                let event = self.events.get(position)?;
                let EventPayload::Marker(value) = event.payload else {
                    return None;
                };
                Some(MarkerEntry {
                    position,
                    group: event.group,
                    value,
                    timestamp: event.timestamp,
                })
            })
            .collect()
    }

    /// Every group ever declared, root first, with totals at the cursor.
    pub fn groups(&self) -> impl Iterator<Item = &RecordedAllocationGroup> + '_ {
        self.groups.iter()
    }

    /// Group by id.
    #[must_use]
    pub fn group(&self, id: GroupId) -> Option<&RecordedAllocationGroup> {
        self.groups.get(*self.index.get(&id)?)
    }

    /// Group by name-path.
    #[must_use]
    pub fn group_by_path(&self, path: &str) -> Option<&RecordedAllocationGroup> {
        let path = memtrail_profile::group::normalize_path(path);
        self.groups.iter().find(|group| group.path() == path)
    }

    /// Number of groups, root included.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Totals after the last event, this group only.
    #[must_use]
    pub fn final_totals(&self, id: GroupId) -> Option<Totals> {
        self.tail.get(*self.index.get(&id)?).copied()
    }
}

/// Turns a profiler snapshot into the events that rebuild it: one
/// declaration per non-root group, parents first, then an `Allocate` and an
/// `Acquire` for every non-zero own total. Seeds carry sequence and
/// timestamp zero.
pub(crate) fn seed_events(snapshot: &[GroupSnapshot]) -> Vec<Event> {
    let seed = |group: GroupId, payload: EventPayload| Event {
        sequence: 0,
        timestamp: 0,
        group,
        payload,
    };
    let declarations = snapshot
        .iter()
        .filter(|group| group.declaration.id != GroupId::ROOT)
        .map(|group| {
            seed(
                group.declaration.id,
                EventPayload::Declared {
                    parent: group.declaration.parent,
                    path: Arc::clone(&group.declaration.path),
                },
            )
        });
    let totals = snapshot.iter().flat_map(|group| {
        let id = group.declaration.id;
        let allocate = (group.own.reserved > 0).then(|| seed(id, EventPayload::Allocate(group.own.reserved)));
        let acquire = (group.own.used > 0).then(|| seed(id, EventPayload::Acquire(group.own.used)));
        allocate.into_iter().chain(acquire)
    });
    declarations.chain(totals).collect()
}

impl Default for Track {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupDirectory for Track {
    fn declaration(&self, id: GroupId) -> Option<GroupDeclaration> {
        self.group(id).map(|group| group.declaration.clone())
    }
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("status", &self.status)
            .field("events", &self.events.len())
            .field("groups", &self.groups.len())
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memtrail_profile::ProfilerConfig;
    use std::io::Cursor;

    fn event(sequence: u64, group: u32, payload: EventPayload) -> Event {
        Event {
            sequence,
            timestamp: sequence,
            group: GroupId::from_raw(group),
            payload,
        }
    }

    fn declare(sequence: u64, group: u32, parent: u32, path: &str) -> Event {
        event(
            sequence,
            group,
            EventPayload::Declared {
                parent: Some(GroupId::from_raw(parent)),
                path: Arc::from(path),
            },
        )
    }

    /// E1..E5, with E3 acquiring 100 bytes for "Render".
    fn render_track() -> Track {
        let mut track = Track::new();
        track.report_event(declare(1, 1, 0, "Render")).unwrap();
        track.report_event(event(2, 1, EventPayload::Allocate(100))).unwrap();
        track.report_event(event(3, 1, EventPayload::Acquire(100))).unwrap();
        track.report_event(event(4, 1, EventPayload::Marker(7))).unwrap();
        track.report_event(event(5, 1, EventPayload::Release(100))).unwrap();
        track.end_capture().unwrap();
        track
    }

    fn render(map: &GroupStateMap) -> Totals {
        map.get("Render").map(|stats| stats.own).unwrap_or_default()
    }

    #[test]
    fn test_steps_apply_and_undo_one_event() {
        let mut track = render_track();
        assert_eq!(track.status(), TrackState::Idle);

        for _ in 0..3 {
            assert!(track.move_to_next_event());
        }
        assert_eq!(render(&track.state()), Totals::new(100, 100));
        assert_eq!(track.group_by_path("Render").map(RecordedAllocationGroup::own), Some(Totals::new(100, 100)));

        assert!(track.move_to_previous_event());
        assert_eq!(track.position(), 2);
        assert_eq!(render(&track.state()), Totals::new(100, 0));
    }

    #[test]
    fn test_cursor_bounds() {
        let mut track = render_track();
        assert!(!track.move_to_previous_event());
        assert_eq!(track.seek(99), 5);
        assert!(!track.move_to_next_event());
        assert_eq!(track.seek(0), 0);
    }

    #[test]
    fn test_group_appears_after_its_declaration() {
        let track = render_track();
        assert!(!track.state_at(0).contains_key("Render"));
        assert!(track.state_at(1).contains_key("Render"));
        assert!(track.state_at(0).contains_key(""));
    }

    #[test]
    fn test_state_matches_state_at_everywhere() {
        let mut track = render_track();
        for position in 0..=track.len() {
            track.seek(position);
            assert_eq!(track.state(), track.state_at(position), "position {position}");
        }
        for position in (0..=track.len()).rev() {
            track.seek(position);
            assert_eq!(track.state(), track.state_at(position), "position {position}");
        }
    }

    #[test]
    fn test_markers() {
        let track = render_track();
        assert_eq!(
            track.markers(),
            vec![MarkerEntry {
                position: 3,
                group: GroupId::from_raw(1),
                value: 7,
                timestamp: 4
            }]
        );
    }

    #[test]
    fn test_inclusive_totals_sum_descendants() {
        let mut track = Track::new();
        track.report_event(declare(1, 1, 0, "Render")).unwrap();
        track.report_event(declare(2, 2, 1, "Render/Meshes")).unwrap();
        track.report_event(declare(3, 3, 1, "Render/Textures")).unwrap();
        track.report_event(event(4, 1, EventPayload::Allocate(10))).unwrap();
        track.report_event(event(5, 2, EventPayload::Allocate(20))).unwrap();
        track.report_event(event(6, 3, EventPayload::Allocate(30))).unwrap();
        track.report_event(event(7, 3, EventPayload::Acquire(5))).unwrap();

        let state = track.state_at(track.len());
        assert_eq!(state["Render"].own, Totals::new(10, 0));
        assert_eq!(state["Render"].inclusive, Totals::new(60, 5));
        assert_eq!(state[""].inclusive, Totals::new(60, 5));

        track.seek(track.len());
        assert_eq!(track.state(), state);
        assert_eq!(track.final_totals(GroupId::from_raw(3)), Some(Totals::new(30, 5)));
    }

    #[test]
    fn test_rejects_inconsistent_events() {
        let mut track = Track::new();
        assert!(matches!(
            track.report_event(event(1, 9, EventPayload::Allocate(1))),
            Err(TrackError::UnknownGroup(id)) if id.raw() == 9
        ));
        assert!(matches!(
            track.report_event(declare(1, 2, 5, "Orphan")),
            Err(TrackError::UnknownGroup(id)) if id.raw() == 5
        ));
        track.report_event(declare(2, 1, 0, "Render")).unwrap();
        assert!(matches!(
            track.report_event(event(3, 1, EventPayload::Acquire(1))),
            Err(TrackError::Accounting(_))
        ));
        assert_eq!(
            track.report_event(declare(4, 1, 0, "Render")).unwrap(),
            ReadStatus::Skipped
        );
        assert!(matches!(
            track.report_event(declare(5, 1, 0, "Audio")),
            Err(TrackError::DuplicateGroup(_))
        ));
        assert_eq!(track.len(), 1);
    }

    #[test]
    fn test_lifecycle_guards() {
        let mut track = Track::new();
        assert_eq!(track.status(), TrackState::Empty);
        assert!(matches!(track.pump(), Err(TrackError::InvalidState { .. })));
        assert!(matches!(
            track.try_read_next_event(),
            Err(TrackError::InvalidState { state: TrackState::Empty, .. })
        ));

        let profiler = Profiler::new(ProfilerConfig::default()).unwrap();
        track.begin_capture(&profiler).unwrap();
        assert!(track.begin_capture(&profiler).is_err());
        assert!(track.begin_deserialize(Cursor::new(Vec::new())).is_err());
        track.end_capture().unwrap();

        assert!(matches!(
            track.report_event(declare(1, 1, 0, "Late")),
            Err(TrackError::InvalidState { state: TrackState::Idle, .. })
        ));
        assert!(track.end_capture().is_err());
    }

    #[test]
    fn test_capture_seeds_existing_totals() {
        let profiler = Profiler::new(ProfilerConfig::default()).unwrap();
        let meshes = profiler.group("Render/Meshes");
        meshes.allocate(256).unwrap();
        meshes.acquire(64).unwrap();

        let mut track = Track::new();
        track.begin_capture(&profiler).unwrap();
        // Two declarations and two seeds.
        assert_eq!(track.len(), 4);

        meshes.release(64).unwrap();
        let audio = profiler.group("Audio");
        audio.allocate(8).unwrap();
        profiler.mark(audio.id(), 1);
        assert_eq!(track.pump().unwrap(), 4);

        meshes.free(256).unwrap();
        assert_eq!(track.end_capture().unwrap(), 1);

        meshes.allocate(1).unwrap();
        assert!(matches!(track.pump(), Err(TrackError::InvalidState { .. })));

        for path in ["Render", "Render/Meshes", "Audio"] {
            assert!(track.group_by_path(path).is_some(), "{path}");
        }
        let state = track.state_at(7);
        assert_eq!(state["Render"].inclusive, Totals::new(256, 0));
        assert_eq!(state["Audio"].own, Totals::new(8, 0));
        let end = track.state_at(track.len());
        assert_eq!(end["Render/Meshes"].own, Totals::ZERO);
        assert_eq!(track.markers().len(), 1);
    }

    #[test]
    fn test_lagging_capture_reports_missed_events() {
        let config = ProfilerConfig {
            max_retained_events: 2,
            ..ProfilerConfig::default()
        };
        let profiler = Profiler::new(config).unwrap();
        let lagging = profiler.group("Lagging");

        let mut track = Track::new();
        track.begin_capture(&profiler).unwrap();
        lagging.allocate(10).unwrap();
        lagging.allocate(10).unwrap();
        assert_eq!(track.pump().unwrap(), 2);

        for _ in 0..3 {
            lagging.allocate(10).unwrap();
        }
        assert!(matches!(track.pump(), Err(TrackError::EventsMissed { count: 1 })));
        assert_eq!(track.status(), TrackState::Idle);
        assert_eq!(track.len(), 3);
        assert_eq!(track.state_at(track.len())["Lagging"].own, Totals::new(20, 0));
        assert_eq!(lagging.stats().own, Totals::new(50, 0));

        assert!(matches!(track.pump(), Err(TrackError::InvalidState { .. })));
        assert!(track.end_capture().is_err());
    }

    #[test]
    fn test_end_capture_reports_missed_events() {
        let config = ProfilerConfig {
            max_retained_events: 2,
            ..ProfilerConfig::default()
        };
        let profiler = Profiler::new(config).unwrap();
        let lagging = profiler.group("Lagging");

        let mut track = Track::new();
        track.begin_capture(&profiler).unwrap();
        for _ in 0..4 {
            lagging.allocate(1).unwrap();
        }
        assert!(matches!(track.end_capture(), Err(TrackError::EventsMissed { count: 2 })));
        assert_eq!(track.status(), TrackState::Idle);
        assert_eq!(track.len(), 1);
    }

    #[test]
    fn test_failed_append_keeps_rest_of_batch() {
        let profiler = Profiler::new(ProfilerConfig::default()).unwrap();
        let scratch = profiler.group("Scratch");

        let mut track = Track::new();
        track.begin_capture(&profiler).unwrap();
        scratch.allocate(100).unwrap();
        assert_eq!(track.pump().unwrap(), 1);

        // The track no longer holds the reservation the live group still has.
        track
            .report_event(event(0, scratch.id().raw(), EventPayload::Free(100)))
            .unwrap();
        scratch.acquire(50).unwrap();
        scratch.allocate(10).unwrap();
        scratch.mark(3);

        assert!(matches!(track.pump(), Err(TrackError::Accounting(_))));
        assert_eq!(track.status(), TrackState::Populating);
        assert_eq!(track.pump().unwrap(), 2);
        assert_eq!(track.end_capture().unwrap(), 0);

        assert_eq!(track.state_at(track.len())["Scratch"].own, Totals::new(10, 0));
        assert_eq!(track.markers().len(), 1);
    }

    #[test]
    fn test_appends_return_the_stored_event() {
        let mut track = Track::new();
        let declared = declare(1, 1, 0, "Render");
        assert_eq!(
            track.report_event(declared.clone()).unwrap(),
            ReadStatus::Event(declared)
        );

        let bytes = render_track().write_to(Vec::new()).unwrap();
        let mut track = Track::new();
        track.begin_deserialize(Cursor::new(bytes)).unwrap();
        let mut read = Vec::new();
        loop {
            match track.try_read_next_event().unwrap() {
                ReadStatus::Event(event) => read.push(event),
                ReadStatus::Skipped => {}
                ReadStatus::EndOfStream => break,
            }
        }
        assert_eq!(read.len(), 5);
        assert!(matches!(&read[0].payload, EventPayload::Declared { path, .. } if &**path == "Render"));
        assert_eq!(read[2].payload, EventPayload::Acquire(100));
        assert!(read.iter().zip(track.events()).all(|(read, stored)| read == stored));
    }

    #[test]
    fn test_round_trip_preserves_every_state() {
        let profiler = Profiler::new(ProfilerConfig::default()).unwrap();
        profiler.group("Physics").allocate(512).unwrap();

        let mut track = Track::new();
        track.begin_capture(&profiler).unwrap();
        let bodies = profiler.group("Physics/Bodies");
        bodies.allocate(1024).unwrap();
        for _ in 0..10 {
            bodies.acquire(100).unwrap();
        }
        profiler.mark(bodies.id(), 42);
        for _ in 0..4 {
            bodies.release(100).unwrap();
        }
        track.end_capture().unwrap();

        let bytes = track.write_to(Vec::new()).unwrap();
        let restored = Track::deserialize(Cursor::new(bytes)).unwrap();

        assert_eq!(restored.status(), TrackState::Idle);
        assert_eq!(restored.len(), track.len());
        assert_eq!(restored.group_count(), track.group_count());
        assert_eq!(restored.markers(), track.markers());
        for position in 0..=track.len() {
            assert_eq!(restored.state_at(position), track.state_at(position), "position {position}");
        }
    }

    #[test]
    fn test_loads_in_work_slices() {
        let bytes = render_track().write_to(Vec::new()).unwrap();
        let mut track = Track::new();
        track.begin_deserialize(Cursor::new(bytes)).unwrap();

        let mut slices = 0;
        while !track.read_slice(2).unwrap() {
            slices += 1;
            assert_eq!(track.status(), TrackState::Populating);
        }
        assert!(slices >= 2);
        assert_eq!(track.len(), 5);
        assert_eq!(track.status(), TrackState::Idle);
    }

    #[test]
    fn test_corrupted_stream_keeps_prefix() {
        let mut bytes = render_track().write_to(Vec::new()).unwrap();
        let last = bytes.len() - 10;
        bytes[last] ^= 0x55;

        let mut track = Track::new();
        track.begin_deserialize(Cursor::new(bytes)).unwrap();
        let error = loop {
            match track.try_read_next_event() {
                Ok(ReadStatus::EndOfStream) => panic!("corruption reported as end of stream"),
                Ok(_) => {}
                Err(error) => break error,
            }
        };
        assert!(matches!(error, TrackError::ChecksumMismatch { .. }));
        assert_eq!(track.status(), TrackState::Idle);
        assert_eq!(track.len(), 4);
    }

    #[test]
    fn test_bad_header_leaves_track_untouched() {
        let mut track = render_track();
        assert!(matches!(
            track.begin_deserialize(Cursor::new(b"JUNKJUNK".to_vec())),
            Err(TrackError::BadMagic(_))
        ));
        assert_eq!(track.len(), 5);
    }

    #[test]
    fn test_small_segments() {
        let mut track = Track::with_config(&TrackConfig { segment_len: 2 }).unwrap();
        track.report_event(declare(1, 1, 0, "Render")).unwrap();
        for sequence in 0..9 {
            track.report_event(event(sequence, 1, EventPayload::Marker(sequence))).unwrap();
        }
        assert_eq!(track.segment_count(), 5);
        assert_eq!(track.markers().len(), 9);
        assert_eq!(track.event(9).map(|e| e.sequence), Some(8));
    }
}
