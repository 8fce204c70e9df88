//! # Recording Error Types
//!
//! Stream errors carry the byte offset of the record that failed so a
//! truncated or damaged file can be diagnosed without a hex dump.
//! Running out of records is not an error: see [`ReadStatus::EndOfStream`].

use memtrail_profile::{AccountingError, Event, GroupId};
use thiserror::Error;

use crate::track::TrackState;

/// Errors raised while capturing, encoding, decoding or replaying a track.
#[derive(Error, Debug)]
pub enum TrackError {
    /// The underlying reader or writer failed.
    #[error("track I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream does not start with the track magic.
    #[error("not a track stream: bad magic {0:02x?}")]
    BadMagic([u8; 4]),

    /// The stream was written by a newer format version.
    #[error("track format version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// Version found in the header.
        found: u16,
        /// Newest version this reader understands.
        supported: u16,
    },

    /// The stream ended in the middle of the header or a record.
    #[error("track stream truncated at byte {offset}")]
    UnexpectedEof {
        /// Offset of the incomplete header or record.
        offset: u64,
    },

    /// A record's checksum does not match its contents.
    #[error("checksum mismatch in record at byte {offset}: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// Offset of the damaged record.
        offset: u64,
        /// Checksum stored in the stream.
        stored: u32,
        /// Checksum of the bytes actually read.
        computed: u32,
    },

    /// A record is intact but its contents make no sense.
    #[error("malformed record at byte {offset}: {reason}")]
    MalformedRecord {
        /// Offset of the record.
        offset: u64,
        /// What is wrong with it.
        reason: String,
    },

    /// An event refers to a group that was never declared.
    #[error("event refers to undeclared group {0}")]
    UnknownGroup(GroupId),

    /// A group id was declared twice with different paths.
    #[error("group {0} declared twice with different paths")]
    DuplicateGroup(GroupId),

    /// An operation event would break the group's totals.
    #[error(transparent)]
    Accounting(#[from] AccountingError),

    /// The track is not in a state that allows the call.
    #[error("cannot {operation} while the track is {state}")]
    InvalidState {
        /// The rejected call.
        operation: &'static str,
        /// State at the time of the call.
        state: TrackState,
    },

    /// The capture observer fell behind and the profiler dropped events.
    #[error("capture missed {count} events dropped by the profiler")]
    EventsMissed {
        /// Number of events dropped.
        count: u64,
    },

    /// Recorder settings are unusable.
    #[error("invalid recorder configuration: {0}")]
    InvalidConfig(String),

    /// The recorder thread panicked before returning its writer.
    #[error("recorder thread panicked")]
    RecorderPanicked,
}

/// Result type for recording operations.
pub type TrackResult<T> = Result<T, TrackError>;

/// Outcome of appending or reading one event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadStatus {
    /// This event was appended.
    Event(Event),
    /// A record with an unknown tag was skipped.
    Skipped,
    /// The stream ended cleanly on a record boundary.
    EndOfStream,
}
