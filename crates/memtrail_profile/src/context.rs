//! # Current-Group Context
//!
//! A thread-local stack of allocation groups. A subsystem places its group
//! on top for the duration of a scope, and any allocator constructed inside
//! that scope attributes itself to that group without either side naming
//! the other's types.
//!
//! ```rust,ignore
//! let _scope = AllocationGroup::get("Render").place_on_top();
//! let pool = UnorderedPool::new(config)?; // reports to "Render"
//! ```

use std::cell::RefCell;
use std::marker::PhantomData;

use crate::group::AllocationGroup;
use crate::profiler::Profiler;

thread_local! {
    static CURRENT: RefCell<Vec<AllocationGroup>> = const { RefCell::new(Vec::new()) };
}

/// Returns the thread's current group without changing it.
///
/// Falls back to the process-wide root when nothing has been placed.
#[must_use]
pub fn top() -> AllocationGroup {
    CURRENT
        .with(|stack| stack.borrow().last().cloned())
        .unwrap_or_else(|| Profiler::global().root())
}

/// Pushes `group` as the thread's current group.
///
/// The returned guard restores the previous top when dropped, including
/// during unwinding. Dropping a guard truncates the stack to its own
/// depth: any placement made after it is popped too, so a guard dropped
/// out of order also ends the scopes nested inside it.
#[must_use = "the group is popped as soon as the guard is dropped"]
pub fn place_on_top(group: &AllocationGroup) -> TopGuard {
    let depth = CURRENT.with(|stack| {
        let mut stack = stack.borrow_mut();
        stack.push(group.clone());
        stack.len()
    });
    TopGuard {
        depth,
        _not_send: PhantomData,
    }
}

/// Inserts a marker attributed to the current group.
pub fn mark(marker: u64) {
    top().mark(marker);
}

/// Scope guard returned by [`place_on_top`].
///
/// Tied to the thread that created it.
pub struct TopGuard {
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl Drop for TopGuard {
    fn drop(&mut self) {
        // Truncating (rather than popping) also discards entries pushed by
        // inner guards that were leaked.
        let _ = CURRENT.try_with(|stack| {
            stack.borrow_mut().truncate(self.depth.saturating_sub(1));
        });
    }
}
