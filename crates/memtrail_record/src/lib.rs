//! # MEMTRAIL Record
//!
//! Captures a profiler's event stream into a [`Track`], writes and reads
//! the track stream format, and replays recorded history.
//!
//! ## Architecture
//!
//! ```text
//!  Profiler ──observe──► Track (capture)  ──serialize──► TrackWriter ──► bytes
//!     │                                                                  │
//!     └──observe──► StreamingRecorder ──► TrackWriter ──► bytes          │
//!                                                                        ▼
//!  Track (replay) ◄── try_read_next_event ◄── TrackReader ◄──────────── bytes
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use memtrail_record::Track;
//!
//! let mut track = Track::new();
//! track.begin_capture(memtrail_profile::Profiler::global())?;
//! run_frame();
//! track.end_capture()?;
//!
//! track.seek(track.len() / 2);
//! for (path, stats) in track.state() {
//!     println!("{path}: {} / {}", stats.own.used, stats.own.reserved);
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod codec;
pub mod config;
pub mod error;
pub mod recorder;
mod storage;
pub mod track;

pub use codec::{
    EventBody, GroupDirectory, Record, TrackReader, TrackWriter, HEADER_LEN, RECORD_OVERHEAD,
    TRACK_MAGIC, TRACK_VERSION,
};
pub use config::{RecorderConfig, TrackConfig};
pub use error::{ReadStatus, TrackError, TrackResult};
pub use recorder::{RecorderStats, StreamingRecorder};
pub use storage::DEFAULT_SEGMENT_LEN;
pub use track::{GroupStateMap, MarkerEntry, RecordedAllocationGroup, Track, TrackState};
