//! # MEMTRAIL
//!
//! Tracked pool and stack allocators, hierarchical memory accounting, and
//! recording and replay of memory usage history.
//!
//! ## Crates
//!
//! | Crate | Contents |
//! |-------|----------|
//! | [`profile`] | allocation groups, thread-local context, event stream |
//! | [`alloc`] | ordered and unordered pools, stack allocator |
//! | [`record`] | tracks, stream format, background recorder |
//!
//! ## Example
//!
//! ```rust,ignore
//! use memtrail::{AllocationGroup, ChunkPool, MemtrailConfig, Track, UnorderedPool};
//!
//! let config = MemtrailConfig::load("memtrail.toml")?;
//! config.install_profiler()?;
//!
//! let mut track = Track::with_config(&config.track)?;
//! track.begin_capture(memtrail::Profiler::global())?;
//! {
//!     let _scope = AllocationGroup::get("Audio/Voices").place_on_top();
//!     let mut voices = UnorderedPool::new(&config.pool)?;
//!     let voice = voices.acquire()?;
//!     voices.release(voice);
//! }
//! track.end_capture()?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;

pub use memtrail_alloc as alloc;
pub use memtrail_profile as profile;
pub use memtrail_record as record;

pub use config::MemtrailConfig;
pub use error::{ConfigError, ConfigResult};

pub use memtrail_alloc::{
    Checkpoint, ChunkHandle, ChunkPool, OrderedPool, PoolConfig, PoolError, StackAllocation,
    StackAllocator, StackConfig, StackError, UnorderedPool,
};
pub use memtrail_profile::{
    mark, place_on_top, top, AccountingError, AllocationGroup, Event, EventKind, EventPayload,
    GroupId, GroupStats, Observer, Profiler, ProfilerConfig, Totals, TopGuard,
};
pub use memtrail_record::{
    GroupStateMap, ReadStatus, RecorderConfig, RecorderStats, StreamingRecorder, Track, TrackConfig,
    TrackError, TrackReader, TrackState, TrackWriter,
};
