//! # Stack Allocator
//!
//! Linear allocation from one preallocated buffer, rewound to saved
//! checkpoints instead of freed piecewise.
//!
//! ```text
//! ┌──────────── used ────────────┬────────── free ──────────┐
//! │ a │pad│   b   │      c       │                          │
//! └──────────────────────────────┴──────────────────────────┘
//!                  ▲ checkpoint   ▲ top
//! ```
//!
//! The whole buffer is reported as reserved when the stack is built; each
//! acquire reports its padded size as used.

use bytemuck::Pod;
use memtrail_profile::AllocationGroup;

use crate::config::StackConfig;
use crate::error::{StackError, StackResult};
use crate::tracker::GroupTracker;

/// A saved top-of-stack position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    top: usize,
    owner: usize,
}

impl Checkpoint {
    /// Bytes in use when the checkpoint was taken.
    #[must_use]
    pub const fn offset(self) -> usize {
        self.top
    }
}

/// A region handed out by [`StackAllocator::acquire`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StackAllocation {
    offset: usize,
    len: usize,
}

impl StackAllocation {
    /// Offset of the first byte inside the stack buffer.
    #[must_use]
    pub const fn offset(self) -> usize {
        self.offset
    }

    /// Requested size in bytes.
    #[must_use]
    pub const fn len(self) -> usize {
        self.len
    }

    /// True for zero-byte allocations.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.len == 0
    }
}

/// Checkpointed bump allocator.
///
/// # Thread Safety
///
/// NOT thread-safe. Use one stack per thread.
///
/// # Example
///
/// ```rust,ignore
/// let mut stack = StackAllocator::new(&StackConfig::new(64 * 1024))?;
/// let frame = stack.head();
/// let scratch = stack.acquire(4096, 16)?;
/// stack.bytes_mut(scratch).unwrap().fill(0);
/// stack.release(frame);
/// ```
pub struct StackAllocator {
    storage: Box<[u8]>,
    top: usize,
    tracker: GroupTracker,
}

impl StackAllocator {
    /// Allocates the buffer and attributes it to the thread's current group.
    ///
    /// # Errors
    ///
    /// Returns [`StackError::InvalidConfig`] for a zero capacity or if the
    /// buffer cannot be allocated.
    pub fn new(config: &StackConfig) -> StackResult<Self> {
        Self::build(config, GroupTracker::current())
    }

    /// Allocates the buffer and attributes it to `group`.
    ///
    /// # Errors
    ///
    /// Same as [`StackAllocator::new`].
    pub fn with_group(config: &StackConfig, group: AllocationGroup) -> StackResult<Self> {
        Self::build(config, GroupTracker::new(group))
    }

    fn build(config: &StackConfig, tracker: GroupTracker) -> StackResult<Self> {
        config.validate()?;
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(config.capacity).map_err(|error| {
            StackError::InvalidConfig(format!(
                "cannot allocate {} byte stack: {error}",
                config.capacity
            ))
        })?;
        buffer.resize(config.capacity, 0);

        tracker.allocate(config.capacity);
        tracing::debug!(capacity = config.capacity, group = %tracker.group().path(), "stack allocated");
        Ok(Self {
            storage: buffer.into_boxed_slice(),
            top: 0,
            tracker,
        })
    }

    /// Group this stack reports to.
    #[must_use]
    pub const fn group(&self) -> &AllocationGroup {
        self.tracker.group()
    }

    /// Buffer size in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Bytes left above the top.
    #[inline]
    #[must_use]
    pub fn free_space(&self) -> usize {
        self.storage.len() - self.top
    }

    /// Bytes in use, padding included.
    #[inline]
    #[must_use]
    pub const fn used(&self) -> usize {
        self.top
    }

    fn owner(&self) -> usize {
        self.storage.as_ptr() as usize
    }

    /// Bumps the top by `size` bytes, aligned to `align` in memory.
    ///
    /// # Errors
    ///
    /// - [`StackError::InvalidAlignment`] if `align` is not a power of two.
    /// - [`StackError::OutOfCapacity`] if the padded request does not fit.
    ///   The top is left unchanged.
    pub fn acquire(&mut self, size: usize, align: usize) -> StackResult<StackAllocation> {
        if !align.is_power_of_two() {
            return Err(StackError::InvalidAlignment(align));
        }
        let address = self.owner() + self.top;
        let padding = address.wrapping_neg() & (align - 1);
        let free = self.free_space();
        let requested = padding.saturating_add(size);
        if requested > free {
            tracing::trace!(requested, free, "stack acquire rejected");
            return Err(StackError::OutOfCapacity { requested, free });
        }

        let allocation = StackAllocation {
            offset: self.top + padding,
            len: size,
        };
        self.top += requested;
        self.tracker.acquire(requested);
        Ok(allocation)
    }

    /// The current top.
    #[must_use]
    pub fn head(&self) -> Checkpoint {
        Checkpoint {
            top: self.top,
            owner: self.owner(),
        }
    }

    /// Rewinds the top to `checkpoint`.
    ///
    /// The checkpoint must come from this stack and must not be above the
    /// current top. Violations are caught in debug builds and ignored
    /// otherwise.
    pub fn release(&mut self, checkpoint: Checkpoint) {
        debug_assert_eq!(checkpoint.owner, self.owner(), "checkpoint from another stack");
        debug_assert!(checkpoint.top <= self.top, "checkpoint above the current top");
        if checkpoint.owner != self.owner() || checkpoint.top > self.top {
            return;
        }
        self.tracker.release(self.top - checkpoint.top);
        self.top = checkpoint.top;
    }

    /// Rewinds to the bottom of the buffer.
    pub fn clear(&mut self) {
        self.tracker.release(self.top);
        self.top = 0;
    }

    /// Bytes of a live allocation. `None` once it has been released.
    #[must_use]
    pub fn bytes(&self, allocation: StackAllocation) -> Option<&[u8]> {
        let end = allocation.offset.checked_add(allocation.len)?;
        if end > self.top {
            return None;
        }
        self.storage.get(allocation.offset..end)
    }

    /// Mutable bytes of a live allocation.
    #[must_use]
    pub fn bytes_mut(&mut self, allocation: StackAllocation) -> Option<&mut [u8]> {
        let end = allocation.offset.checked_add(allocation.len)?;
        if end > self.top {
            return None;
        }
        self.storage.get_mut(allocation.offset..end)
    }

    /// Copies `value` onto the stack.
    ///
    /// # Errors
    ///
    /// Same as [`StackAllocator::acquire`].
    pub fn push<T: Pod>(&mut self, value: T) -> StackResult<StackAllocation> {
        let allocation = self.acquire(std::mem::size_of::<T>(), std::mem::align_of::<T>())?;
        if let Some(bytes) = self.bytes_mut(allocation) {
            bytes.copy_from_slice(bytemuck::bytes_of(&value));
        }
        Ok(allocation)
    }

    /// Views a live allocation as a `T`.
    #[must_use]
    pub fn get<T: Pod>(&self, allocation: StackAllocation) -> Option<&T> {
        bytemuck::try_from_bytes(self.bytes(allocation)?).ok()
    }

    /// Views a live allocation as a mutable `T`.
    #[must_use]
    pub fn get_mut<T: Pod>(&mut self, allocation: StackAllocation) -> Option<&mut T> {
        bytemuck::try_from_bytes_mut(self.bytes_mut(allocation)?).ok()
    }
}

impl Drop for StackAllocator {
    fn drop(&mut self) {
        self.tracker.release(self.top);
        self.tracker.free(self.storage.len());
    }
}
