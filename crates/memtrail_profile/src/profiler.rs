//! # Profiling Backend
//!
//! The only internally synchronized part of MEMTRAIL. One
//! `parking_lot::Mutex` guards the group arena and the event queue
//! together, so a total update and its event are published atomically and
//! the queue order is the order in which totals changed.

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::ProfilerConfig;
use crate::error::{AccountingError, ProfileResult};
use crate::event::{Event, EventKind, EventPayload, GroupDeclaration, GroupId};
use crate::group::{AllocationGroup, GroupArena, GroupSnapshot};
use crate::queue::EventQueue;

static GLOBAL: OnceLock<Profiler> = OnceLock::new();

/// Sequencing half of the locked state.
struct EventStream {
    queue: EventQueue,
    next_sequence: u64,
    enabled: bool,
    epoch: Instant,
}

impl EventStream {
    fn emit(&mut self, group: GroupId, payload: EventPayload) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        if !self.enabled || !self.queue.has_observers() {
            return;
        }
        let timestamp = u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.queue.push(Event {
            sequence,
            timestamp,
            group,
            payload,
        });
    }
}

struct State {
    groups: GroupArena,
    stream: EventStream,
}

struct Shared {
    config: ProfilerConfig,
    state: Mutex<State>,
}

/// Group tree plus event queue.
///
/// `Profiler` is a cheap, clonable handle. [`Profiler::global`] is the
/// process-wide instance that [`AllocationGroup::get`] and the thread-local
/// context default to. Separate instances are fully isolated from it.
#[derive(Clone)]
pub struct Profiler {
    shared: Arc<Shared>,
}

impl Profiler {
    /// Creates an isolated profiler.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: ProfilerConfig) -> ProfileResult<Self> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: ProfilerConfig) -> Self {
        let stream = EventStream {
            queue: EventQueue::new(config.max_retained_events),
            next_sequence: 0,
            enabled: config.enabled,
            epoch: Instant::now(),
        };
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(State {
                    groups: GroupArena::new(),
                    stream,
                }),
            }),
        }
    }

    /// Returns the process-wide profiler, creating it with defaults.
    #[must_use]
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(|| Self::with_valid_config(ProfilerConfig::default()))
    }

    /// Installs the process-wide profiler.
    ///
    /// Returns `false` (and changes nothing) if it already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn install_global(config: ProfilerConfig) -> ProfileResult<bool> {
        let profiler = Self::new(config)?;
        Ok(GLOBAL.set(profiler).is_ok())
    }

    /// Returns the configuration this profiler was built with.
    #[must_use]
    pub fn config(&self) -> &ProfilerConfig {
        &self.shared.config
    }

    /// Returns true if both handles refer to the same profiler.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Returns the root group.
    #[must_use]
    pub fn root(&self) -> AllocationGroup {
        AllocationGroup::new(self.clone(), GroupId::ROOT)
    }

    /// Returns the group at `path`, creating it and its ancestors if absent.
    #[must_use]
    pub fn group(&self, path: &str) -> AllocationGroup {
        let id = {
            let mut state = self.shared.state.lock();
            let State { groups, stream } = &mut *state;
            groups.find_or_create(path, |declaration| {
                stream.emit(
                    declaration.id,
                    EventPayload::Declared {
                        parent: declaration.parent,
                        path: declaration.path,
                    },
                );
            })
        };
        AllocationGroup::new(self.clone(), id)
    }

    /// Number of groups, root included.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.shared.state.lock().groups.len()
    }

    /// Returns the declaration of `id`, if it exists.
    #[must_use]
    pub fn declaration(&self, id: GroupId) -> Option<GroupDeclaration> {
        let state = self.shared.state.lock();
        state.groups.contains(id).then(|| state.groups.declaration(id))
    }

    /// Returns every group with its current totals, parents first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<GroupSnapshot> {
        self.shared.state.lock().groups.snapshot()
    }

    /// Registers a new observer that sees every event emitted after this call.
    #[must_use]
    pub fn observe(&self) -> Observer {
        let slot = self.shared.state.lock().stream.queue.register();
        tracing::debug!(slot, "observer registered");
        Observer {
            profiler: self.clone(),
            slot,
            missed: 0,
        }
    }

    /// Takes a snapshot and registers an observer in one critical section.
    ///
    /// Every change is either reflected in the snapshot or delivered to the
    /// observer, never both and never neither.
    #[must_use]
    pub fn observe_with_snapshot(&self) -> (Vec<GroupSnapshot>, Observer) {
        let (snapshot, slot) = {
            let mut state = self.shared.state.lock();
            let snapshot = state.groups.snapshot();
            (snapshot, state.stream.queue.register())
        };
        tracing::debug!(slot, groups = snapshot.len(), "observer registered with snapshot");
        (
            snapshot,
            Observer {
                profiler: self.clone(),
                slot,
                missed: 0,
            },
        )
    }

    /// Inserts a marker into the stream.
    pub fn mark(&self, group: GroupId, marker: u64) {
        self.shared.state.lock().stream.emit(group, EventPayload::Marker(marker));
    }

    pub(crate) fn report(&self, id: GroupId, kind: EventKind, amount: u64) -> Result<(), AccountingError> {
        let result = {
            let mut state = self.shared.state.lock();
            let result = state.groups.apply(id, kind, amount);
            if let (Ok(()), Some(payload)) = (&result, EventPayload::operation(kind, amount)) {
                state.stream.emit(id, payload);
            }
            result
        };
        if let Err(error) = &result {
            tracing::warn!(group = %id, %error, "rejected accounting operation");
        }
        result
    }

    pub(crate) fn with_groups<R>(&self, f: impl FnOnce(&GroupArena) -> R) -> R {
        f(&self.shared.state.lock().groups)
    }
}

/// Independent reader of a profiler's event stream.
///
/// Dropping the observer releases any events only it was holding back.
pub struct Observer {
    profiler: Profiler,
    slot: usize,
    missed: u64,
}

impl Observer {
    /// Appends every unread event to `out`. Returns how many were appended.
    pub fn poll(&mut self, out: &mut Vec<Event>) -> usize {
        self.poll_batch(out, usize::MAX)
    }

    /// Appends at most `limit` unread events to `out`.
    pub fn poll_batch(&mut self, out: &mut Vec<Event>, limit: usize) -> usize {
        let (count, missed) = self
            .profiler
            .shared
            .state
            .lock()
            .stream
            .queue
            .read(self.slot, out, limit);
        if missed > 0 {
            self.missed += missed;
            tracing::warn!(slot = self.slot, missed, "observer fell behind, events dropped");
        }
        count
    }

    /// Number of queued events not yet read.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.profiler.shared.state.lock().stream.queue.pending(self.slot)
    }

    /// Total events dropped before this observer could read them.
    #[must_use]
    pub const fn missed(&self) -> u64 {
        self.missed
    }

    /// Returns the profiler being observed.
    #[must_use]
    pub const fn profiler(&self) -> &Profiler {
        &self.profiler
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        self.profiler.shared.state.lock().stream.queue.unregister(self.slot);
        tracing::debug!(slot = self.slot, "observer unregistered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Totals;
    use std::thread;

    fn profiler() -> Profiler {
        Profiler::new(ProfilerConfig::default()).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ProfilerConfig {
            max_retained_events: 0,
            ..ProfilerConfig::default()
        };
        assert!(Profiler::new(config).is_err());
    }

    #[test]
    fn test_each_operation_emits_one_event() {
        let profiler = profiler();
        let group = profiler.group("Physics");
        let mut observer = profiler.observe();

        group.allocate(64).unwrap();
        group.acquire(32).unwrap();
        group.release(32).unwrap();
        group.free(64).unwrap();
        group.mark(7);

        let mut events = Vec::new();
        assert_eq!(observer.poll(&mut events), 5);
        let kinds: Vec<_> = events.iter().map(Event::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Allocate,
                EventKind::Acquire,
                EventKind::Release,
                EventKind::Free,
                EventKind::Marker
            ]
        );
        assert!(events.windows(2).all(|w| w[0].sequence < w[1].sequence));
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(events.iter().all(|e| e.group == group.id()));
    }

    #[test]
    fn test_new_groups_emit_declarations_parent_first() {
        let profiler = profiler();
        let mut observer = profiler.observe();
        let meshes = profiler.group("Render/Meshes");
        let _again = profiler.group("Render/Meshes");

        let mut events = Vec::new();
        observer.poll(&mut events);
        assert_eq!(events.len(), 2);
        let render = events[0].declaration().unwrap();
        let leaf = events[1].declaration().unwrap();
        assert_eq!(&*render.path, "Render");
        assert_eq!(render.parent, Some(GroupId::ROOT));
        assert_eq!(leaf.id, meshes.id());
        assert_eq!(leaf.parent, Some(render.id));
    }

    #[test]
    fn test_rejected_operation_emits_nothing() {
        let profiler = profiler();
        let group = profiler.group("Audio");
        let mut observer = profiler.observe();
        assert!(group.acquire(1).is_err());
        assert_eq!(observer.pending(), 0);
        let mut events = Vec::new();
        assert_eq!(observer.poll(&mut events), 0);
    }

    #[test]
    fn test_disabled_profiler_still_counts() {
        let profiler = Profiler::new(ProfilerConfig {
            enabled: false,
            ..ProfilerConfig::default()
        })
        .unwrap();
        let group = profiler.group("Render");
        let observer = profiler.observe();
        group.allocate(10).unwrap();
        assert_eq!(observer.pending(), 0);
        assert_eq!(group.stats().own, Totals::new(10, 0));
    }

    #[test]
    fn test_snapshot_and_observer_are_consistent() {
        let profiler = profiler();
        let group = profiler.group("Render");
        group.allocate(100).unwrap();

        let (snapshot, mut observer) = profiler.observe_with_snapshot();
        group.acquire(40).unwrap();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[1].own, Totals::new(100, 0));
        let mut events = Vec::new();
        observer.poll(&mut events);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload, EventPayload::Acquire(40));
    }

    #[test]
    fn test_concurrent_reports_stay_consistent() {
        let profiler = profiler();
        let mut observer = profiler.observe();
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let group = profiler.group(&format!("Workers/{t}"));
                thread::spawn(move || {
                    for _ in 0..250 {
                        group.allocate(16).unwrap();
                        group.acquire(16).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let workers = profiler.group("Workers");
        assert_eq!(workers.stats().inclusive, Totals::new(4 * 250 * 16, 4 * 250 * 16));

        let mut events = Vec::new();
        observer.poll(&mut events);
        // 5 declarations + 2000 operations, in strictly increasing order.
        assert_eq!(events.len(), 2005);
        assert!(events.windows(2).all(|w| w[0].sequence < w[1].sequence));
    }

    #[test]
    fn test_declaration_lookup() {
        let profiler = profiler();
        let group = profiler.group("Net");
        let declaration = profiler.declaration(group.id()).unwrap();
        assert_eq!(&*declaration.path, "Net");
        assert!(profiler.declaration(GroupId::from_raw(99)).is_none());
    }
}
