//! # Profiling Events
//!
//! Immutable records of one accounting operation, one marker, or one
//! group declaration. Events are globally ordered by `sequence`.

use std::fmt;
use std::sync::Arc;

use crate::error::AccountingError;

/// Stable identity of an allocation group.
///
/// The value is the group's slot in the profiler arena. Slots are never
/// reused, so an id stays valid (and unique) for the profiler's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(u32);

impl GroupId {
    /// The predefined root group.
    pub const ROOT: Self = Self(0);

    /// Creates an id from its raw slot index.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw slot index.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns the slot index as `usize`.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Event discriminant.
///
/// The numeric values double as record tags in the track wire format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventKind {
    /// A group came into existence.
    Declared = 1,
    /// Bytes were reserved.
    Allocate = 2,
    /// Reserved bytes were put into use.
    Acquire = 3,
    /// Used bytes went back to reserved.
    Release = 4,
    /// Reserved bytes were given back.
    Free = 5,
    /// A user-supplied navigation marker.
    Marker = 6,
}

impl EventKind {
    /// Converts from u8.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Declared),
            2 => Some(Self::Allocate),
            3 => Some(Self::Acquire),
            4 => Some(Self::Release),
            5 => Some(Self::Free),
            6 => Some(Self::Marker),
            _ => None,
        }
    }

    /// Returns the operation that undoes this one.
    ///
    /// Declarations and markers are their own inverse: they carry no bytes.
    #[must_use]
    pub const fn inverse(self) -> Self {
        match self {
            Self::Allocate => Self::Free,
            Self::Free => Self::Allocate,
            Self::Acquire => Self::Release,
            Self::Release => Self::Acquire,
            other => other,
        }
    }

    /// Returns true for the four kinds that change group totals.
    #[inline]
    #[must_use]
    pub const fn is_operation(self) -> bool {
        matches!(self, Self::Allocate | Self::Acquire | Self::Release | Self::Free)
    }
}

/// What an event says happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventPayload {
    /// A group was declared.
    Declared {
        /// Parent group, `None` only for the root.
        parent: Option<GroupId>,
        /// Full name-path of the group.
        path: Arc<str>,
    },
    /// Bytes reserved.
    Allocate(u64),
    /// Reserved bytes put into use.
    Acquire(u64),
    /// Used bytes returned to reserved.
    Release(u64),
    /// Reserved bytes given back.
    Free(u64),
    /// Opaque user marker.
    Marker(u64),
}

impl EventPayload {
    /// Builds the payload of an accounting operation.
    ///
    /// Returns `None` for kinds that are not operations.
    #[must_use]
    pub const fn operation(kind: EventKind, amount: u64) -> Option<Self> {
        match kind {
            EventKind::Allocate => Some(Self::Allocate(amount)),
            EventKind::Acquire => Some(Self::Acquire(amount)),
            EventKind::Release => Some(Self::Release(amount)),
            EventKind::Free => Some(Self::Free(amount)),
            EventKind::Declared | EventKind::Marker => None,
        }
    }
}

/// One entry of the profiling stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    /// Global creation order within one profiler.
    pub sequence: u64,
    /// Nanoseconds since the profiler was created. Monotonic in `sequence`.
    pub timestamp: u64,
    /// Group the event is attributed to.
    pub group: GroupId,
    /// Event content.
    pub payload: EventPayload,
}

impl Event {
    /// Returns the event kind.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::Declared { .. } => EventKind::Declared,
            EventPayload::Allocate(_) => EventKind::Allocate,
            EventPayload::Acquire(_) => EventKind::Acquire,
            EventPayload::Release(_) => EventKind::Release,
            EventPayload::Free(_) => EventKind::Free,
            EventPayload::Marker(_) => EventKind::Marker,
        }
    }

    /// Returns the byte delta for operation events.
    #[must_use]
    pub const fn bytes(&self) -> Option<u64> {
        match self.payload {
            EventPayload::Allocate(n)
            | EventPayload::Acquire(n)
            | EventPayload::Release(n)
            | EventPayload::Free(n) => Some(n),
            EventPayload::Declared { .. } | EventPayload::Marker(_) => None,
        }
    }

    /// Returns the declaration carried by a `Declared` event.
    #[must_use]
    pub fn declaration(&self) -> Option<GroupDeclaration> {
        match &self.payload {
            EventPayload::Declared { parent, path } => Some(GroupDeclaration {
                id: self.group,
                parent: *parent,
                path: Arc::clone(path),
            }),
            _ => None,
        }
    }
}

/// Everything needed to rebuild one node of the group tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupDeclaration {
    /// Group id.
    pub id: GroupId,
    /// Parent group, `None` only for the root.
    pub parent: Option<GroupId>,
    /// Full name-path.
    pub path: Arc<str>,
}

/// Reserved and used byte counts.
///
/// Invariant: `used <= reserved`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Totals {
    /// Bytes reserved (includes `used`).
    pub reserved: u64,
    /// Bytes in use.
    pub used: u64,
}

impl Totals {
    /// Empty totals.
    pub const ZERO: Self = Self { reserved: 0, used: 0 };

    /// Creates totals from raw counts.
    #[must_use]
    pub const fn new(reserved: u64, used: u64) -> Self {
        Self { reserved, used }
    }

    /// Reserved bytes not in use.
    #[inline]
    #[must_use]
    pub const fn available(&self) -> u64 {
        self.reserved - self.used
    }

    /// Returns the totals after applying `kind` with `amount` bytes.
    ///
    /// # Errors
    ///
    /// Returns an [`AccountingError`] if the result would break
    /// `used <= reserved`, underflow, or overflow.
    pub fn apply(self, group: GroupId, kind: EventKind, amount: u64) -> Result<Self, AccountingError> {
        let overflow = AccountingError::Overflow { group, kind, requested: amount };
        match kind {
            EventKind::Allocate => Ok(Self {
                reserved: self.reserved.checked_add(amount).ok_or(overflow)?,
                used: self.used,
            }),
            EventKind::Free => {
                if amount > self.available() {
                    return Err(AccountingError::FreeExceedsUnused {
                        group,
                        requested: amount,
                        available: self.available(),
                    });
                }
                Ok(Self { reserved: self.reserved - amount, used: self.used })
            }
            EventKind::Acquire => {
                if amount > self.available() {
                    return Err(AccountingError::AcquireExceedsReserved {
                        group,
                        requested: amount,
                        available: self.available(),
                    });
                }
                Ok(Self { reserved: self.reserved, used: self.used + amount })
            }
            EventKind::Release => {
                if amount > self.used {
                    return Err(AccountingError::ReleaseExceedsUsed {
                        group,
                        requested: amount,
                        used: self.used,
                    });
                }
                Ok(Self { reserved: self.reserved, used: self.used - amount })
            }
            EventKind::Declared | EventKind::Marker => Err(AccountingError::NotAnOperation(kind)),
        }
    }

    /// Returns the totals with `kind` undone.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Totals::apply`] for the inverse operation.
    pub fn revert(self, group: GroupId, kind: EventKind, amount: u64) -> Result<Self, AccountingError> {
        self.apply(group, kind.inverse(), amount)
    }
}
