//! # Profile Error Types

use crate::event::{EventKind, GroupId};
use thiserror::Error;

/// An accounting operation that would break a group's totals.
///
/// Rejected operations leave every total untouched and emit no event.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountingError {
    /// Acquire asked for more than the reserved-but-unused bytes.
    #[error("group {group}: acquire of {requested} bytes exceeds {available} available reserved bytes")]
    AcquireExceedsReserved {
        /// Group the operation targeted.
        group: GroupId,
        /// Bytes requested.
        requested: u64,
        /// Reserved bytes not yet in use.
        available: u64,
    },

    /// Release asked to give back more than is in use.
    #[error("group {group}: release of {requested} bytes exceeds {used} used bytes")]
    ReleaseExceedsUsed {
        /// Group the operation targeted.
        group: GroupId,
        /// Bytes requested.
        requested: u64,
        /// Bytes currently in use.
        used: u64,
    },

    /// Free asked to drop reservation that is still in use or never existed.
    #[error("group {group}: free of {requested} bytes exceeds {available} unused reserved bytes")]
    FreeExceedsUnused {
        /// Group the operation targeted.
        group: GroupId,
        /// Bytes requested.
        requested: u64,
        /// Reserved bytes not in use.
        available: u64,
    },

    /// A total would overflow `u64`.
    #[error("group {group}: {kind:?} of {requested} bytes overflows the total")]
    Overflow {
        /// Group the operation targeted.
        group: GroupId,
        /// Operation kind.
        kind: EventKind,
        /// Bytes requested.
        requested: u64,
    },

    /// The event kind carries no accounting meaning.
    #[error("{0:?} events do not change group totals")]
    NotAnOperation(EventKind),
}

/// Errors raised while setting up the profiling backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProfileError {
    /// Invalid profiler configuration.
    #[error("invalid profiler configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for profiler setup.
pub type ProfileResult<T> = Result<T, ProfileError>;
