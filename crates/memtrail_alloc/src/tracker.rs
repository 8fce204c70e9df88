//! Allocation-group reporting shared by every allocator.
//!
//! Rejected reports are logged by the profiler and never fail the
//! allocation itself.

use memtrail_profile::AllocationGroup;

pub(crate) struct GroupTracker {
    group: AllocationGroup,
}

impl GroupTracker {
    /// Attributes to the thread's current group.
    pub(crate) fn current() -> Self {
        Self::new(memtrail_profile::top())
    }

    pub(crate) const fn new(group: AllocationGroup) -> Self {
        Self { group }
    }

    pub(crate) const fn group(&self) -> &AllocationGroup {
        &self.group
    }

    pub(crate) fn allocate(&self, bytes: usize) {
        if bytes > 0 {
            let _ = self.group.allocate(bytes as u64);
        }
    }

    pub(crate) fn free(&self, bytes: usize) {
        if bytes > 0 {
            let _ = self.group.free(bytes as u64);
        }
    }

    pub(crate) fn acquire(&self, bytes: usize) {
        if bytes > 0 {
            let _ = self.group.acquire(bytes as u64);
        }
    }

    pub(crate) fn release(&self, bytes: usize) {
        if bytes > 0 {
            let _ = self.group.release(bytes as u64);
        }
    }
}
