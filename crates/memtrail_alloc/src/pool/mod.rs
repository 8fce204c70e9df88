//! # Pool Allocators
//!
//! Fixed-size chunk allocation from paged memory.
//!
//! ## Layout
//!
//! ```text
//! page_head ──► Page ──next──► Page ──next──► ∅
//!               │ chunk │ chunk │ chunk │ chunk │
//!                  ▲ free link stored in the chunk's own first 8 bytes
//! free_head ───────┘
//! ```
//!
//! - [`UnorderedPool`]: released chunks go to the free-list head, O(1).
//! - [`OrderedPool`]: pages and free chunks are kept sorted by address,
//!   which enables [`OrderedPool::shrink`] and used-chunk iteration.
//!
//! Links are `(page slot, chunk index)` pairs rather than raw addresses,
//! so a stale link can never point outside the pool's own pages.
//!
//! # Thread Safety
//!
//! Pools are NOT thread-safe. Use one pool per thread or wrap in a mutex.

mod ordered;
mod page;
mod unordered;

pub use ordered::{OrderedPool, UsedChunks};
pub use unordered::UnorderedPool;

use bytemuck::Pod;
use memtrail_profile::AllocationGroup;

use crate::config::{ChunkLayout, PoolConfig};
use crate::error::{PoolError, PoolResult};
use crate::tracker::GroupTracker;
use page::Page;

/// Encoded "no next chunk".
const NIL: u64 = u64::MAX;

/// Handle to one chunk of a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChunkHandle {
    page: u32,
    chunk: u32,
}

impl ChunkHandle {
    const fn new(page: u32, chunk: u32) -> Self {
        Self { page, chunk }
    }

    /// Page slot holding the chunk.
    #[inline]
    #[must_use]
    pub const fn page(self) -> u32 {
        self.page
    }

    /// Chunk index within its page.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.chunk
    }

    const fn encode(link: Option<Self>) -> u64 {
        match link {
            Some(handle) => ((handle.page as u64) << 32) | handle.chunk as u64,
            None => NIL,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn decode(link: u64) -> Option<Self> {
        if link == NIL {
            None
        } else {
            Some(Self::new((link >> 32) as u32, link as u32))
        }
    }
}

/// Common interface of both pool variants.
pub trait ChunkPool {
    /// Takes one chunk, allocating a page if none is free.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::PageAllocation`] if a page was needed and could
    /// not be obtained.
    fn acquire(&mut self) -> PoolResult<ChunkHandle>;

    /// Returns a chunk to the pool.
    ///
    /// The chunk must have come from this pool's `acquire` and must not have
    /// been released since; violating this corrupts the free list.
    fn release(&mut self, chunk: ChunkHandle);

    /// True if no chunk is in use.
    fn is_empty(&self) -> bool;

    /// Drops every page. Outstanding handles become invalid.
    fn clear(&mut self);

    /// Chunks currently in use.
    fn used_count(&self) -> usize;

    /// Pages currently owned.
    fn page_count(&self) -> usize;

    /// Usable bytes per chunk.
    fn chunk_size(&self) -> usize;

    /// Address of the chunk's first byte.
    fn address(&self, chunk: ChunkHandle) -> Option<usize>;

    /// The chunk's bytes.
    fn bytes(&self, chunk: ChunkHandle) -> Option<&[u8]>;

    /// The chunk's bytes, mutably.
    fn bytes_mut(&mut self, chunk: ChunkHandle) -> Option<&mut [u8]>;

    /// Views the start of a chunk as a `T`.
    ///
    /// `None` if `T` does not fit or the chunk is not aligned for `T`.
    fn get<T: Pod>(&self, chunk: ChunkHandle) -> Option<&T>
    where
        Self: Sized,
    {
        let bytes = self.bytes(chunk)?.get(..std::mem::size_of::<T>())?;
        bytemuck::try_from_bytes(bytes).ok()
    }

    /// Copies a `T` out of the start of a chunk, ignoring alignment.
    fn read<T: Pod>(&self, chunk: ChunkHandle) -> Option<T>
    where
        Self: Sized,
    {
        let bytes = self.bytes(chunk)?.get(..std::mem::size_of::<T>())?;
        bytemuck::try_pod_read_unaligned(bytes).ok()
    }

    /// Views the start of a chunk as a mutable `T`.
    fn get_mut<T: Pod>(&mut self, chunk: ChunkHandle) -> Option<&mut T>
    where
        Self: Sized,
    {
        let bytes = self.bytes_mut(chunk)?.get_mut(..std::mem::size_of::<T>())?;
        bytemuck::try_from_bytes_mut(bytes).ok()
    }

    /// Stores `value` at the start of a chunk. Returns false if it cannot.
    fn write<T: Pod>(&mut self, chunk: ChunkHandle, value: T) -> bool
    where
        Self: Sized,
    {
        match self.get_mut::<T>(chunk) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

/// Page and free-list bookkeeping shared by both variants.
pub(crate) struct PoolCore {
    layout: ChunkLayout,
    max_pages: Option<usize>,
    pages: Vec<Option<Page>>,
    vacant: Vec<u32>,
    page_head: Option<u32>,
    page_count: usize,
    free_head: Option<ChunkHandle>,
    used: usize,
    tracker: GroupTracker,
}

impl PoolCore {
    pub(crate) fn new(config: &PoolConfig, group: Option<AllocationGroup>) -> PoolResult<Self> {
        let layout = config.layout()?;
        Ok(Self {
            layout,
            max_pages: config.max_pages,
            pages: Vec::new(),
            vacant: Vec::new(),
            page_head: None,
            page_count: 0,
            free_head: None,
            used: 0,
            tracker: group.map_or_else(GroupTracker::current, GroupTracker::new),
        })
    }

    pub(crate) const fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    pub(crate) const fn group(&self) -> &AllocationGroup {
        self.tracker.group()
    }

    pub(crate) const fn used(&self) -> usize {
        self.used
    }

    pub(crate) const fn page_count(&self) -> usize {
        self.page_count
    }

    pub(crate) const fn page_head(&self) -> Option<u32> {
        self.page_head
    }

    pub(crate) const fn free_head(&self) -> Option<ChunkHandle> {
        self.free_head
    }

    pub(crate) fn page(&self, slot: u32) -> Option<&Page> {
        self.pages.get(slot as usize)?.as_ref()
    }

    fn page_mut(&mut self, slot: u32) -> Option<&mut Page> {
        self.pages.get_mut(slot as usize)?.as_mut()
    }

    fn in_range(&self, chunk: ChunkHandle) -> bool {
        (chunk.chunk as usize) < self.layout.chunks_per_page
    }

    pub(crate) fn address(&self, chunk: ChunkHandle) -> Option<usize> {
        if !self.in_range(chunk) {
            return None;
        }
        let page = self.page(chunk.page)?;
        Some(page.base_address() + chunk.chunk as usize * self.layout.stride)
    }

    /// Address used for ordering; unknown handles sort last.
    fn sort_key(&self, chunk: ChunkHandle) -> usize {
        self.address(chunk).unwrap_or(usize::MAX)
    }

    pub(crate) fn bytes(&self, chunk: ChunkHandle) -> Option<&[u8]> {
        if !self.in_range(chunk) {
            return None;
        }
        self.page(chunk.page)?.chunk(&self.layout, chunk.chunk)
    }

    pub(crate) fn bytes_mut(&mut self, chunk: ChunkHandle) -> Option<&mut [u8]> {
        if !self.in_range(chunk) {
            return None;
        }
        let layout = self.layout;
        self.page_mut(chunk.page)?.chunk_mut(&layout, chunk.chunk)
    }

    /// Next link stored in a free chunk.
    pub(crate) fn link(&self, chunk: ChunkHandle) -> Option<ChunkHandle> {
        let page = self.page(chunk.page)?;
        ChunkHandle::decode(page.read_link(&self.layout, chunk.chunk))
    }

    fn set_link(&mut self, chunk: ChunkHandle, next: Option<ChunkHandle>) {
        let layout = self.layout;
        if let Some(page) = self.page_mut(chunk.page) {
            page.write_link(&layout, chunk.chunk, ChunkHandle::encode(next));
        }
    }

    /// Adds one page and threads all of its chunks, ascending, onto the
    /// front of the free list.
    ///
    /// With `sorted`, the page is linked into the page list by address.
    /// Callers only grow an empty free list, which keeps it sorted too.
    fn grow(&mut self, sorted: bool) -> PoolResult<()> {
        let failure = PoolError::PageAllocation {
            bytes: self.layout.page_bytes,
            pages: self.page_count,
        };
        if self.max_pages.is_some_and(|max| self.page_count >= max) {
            tracing::warn!(pages = self.page_count, "pool page limit reached");
            return Err(failure);
        }
        let Some(mut page) = Page::allocate(&self.layout) else {
            tracing::warn!(bytes = self.layout.page_bytes, "pool page allocation failed");
            return Err(failure);
        };

        let slot = match self.vacant.pop() {
            Some(slot) => slot,
            None => {
                let Ok(slot) = u32::try_from(self.pages.len()) else {
                    return Err(failure);
                };
                self.pages.push(None);
                slot
            }
        };

        let count = u32::try_from(self.layout.chunks_per_page).unwrap_or(u32::MAX);
        for index in 0..count {
            let next = if index + 1 < count {
                Some(ChunkHandle::new(slot, index + 1))
            } else {
                self.free_head
            };
            page.write_link(&self.layout, index, ChunkHandle::encode(next));
        }
        let base = page.base_address();
        let bytes = page.len();
        self.pages[slot as usize] = Some(page);
        self.free_head = Some(ChunkHandle::new(slot, 0));

        if sorted {
            self.link_page_sorted(slot, base);
        } else {
            let head = self.page_head;
            if let Some(page) = self.page_mut(slot) {
                page.next = head;
            }
            self.page_head = Some(slot);
        }
        self.page_count += 1;
        self.tracker.allocate(bytes);
        tracing::debug!(slot, bytes, pages = self.page_count, "pool page allocated");
        Ok(())
    }

    fn link_page_sorted(&mut self, slot: u32, base: usize) {
        let mut previous: Option<u32> = None;
        let mut cursor = self.page_head;
        while let Some(current) = cursor {
            let Some(page) = self.page(current) else { break };
            if page.base_address() > base {
                break;
            }
            previous = Some(current);
            cursor = page.next;
        }
        if let Some(page) = self.page_mut(slot) {
            page.next = cursor;
        }
        match previous {
            Some(previous) => {
                if let Some(page) = self.page_mut(previous) {
                    page.next = Some(slot);
                }
            }
            None => self.page_head = Some(slot),
        }
    }

    /// Pops the free-list head, growing first if the list is empty.
    pub(crate) fn acquire(&mut self, sorted: bool) -> PoolResult<ChunkHandle> {
        if self.free_head.is_none() {
            self.grow(sorted)?;
        }
        let Some(chunk) = self.free_head else {
            return Err(PoolError::PageAllocation {
                bytes: self.layout.page_bytes,
                pages: self.page_count,
            });
        };
        self.free_head = self.link(chunk);
        let next_in_page = self
            .free_head
            .filter(|next| next.page == chunk.page)
            .map(|next| next.chunk);
        if let Some(page) = self.page_mut(chunk.page) {
            page.free -= 1;
            if sorted {
                page.first_free = next_in_page;
            }
        }
        self.used += 1;
        self.tracker.acquire(self.layout.chunk_size);
        Ok(chunk)
    }

    fn mark_released(&mut self, chunk: ChunkHandle) {
        debug_assert!(self.address(chunk).is_some(), "released chunk is not owned by this pool");
        debug_assert!(self.used > 0, "release without matching acquire");
        if let Some(page) = self.page_mut(chunk.page) {
            page.free += 1;
        }
        self.used = self.used.saturating_sub(1);
        self.tracker.release(self.layout.chunk_size);
    }

    /// Releases to the free-list head.
    pub(crate) fn release_front(&mut self, chunk: ChunkHandle) {
        self.mark_released(chunk);
        self.set_link(chunk, self.free_head);
        self.free_head = Some(chunk);
    }

    /// Releases into address order.
    ///
    /// The scan starts at the anchor from [`PoolCore::sorted_anchor`], so
    /// it only walks free chunks of one page.
    pub(crate) fn release_sorted(&mut self, chunk: ChunkHandle) {
        self.mark_released(chunk);
        let key = self.sort_key(chunk);
        let mut previous = self.sorted_anchor(key);
        let mut cursor = match previous {
            Some(anchor) => self.link(anchor),
            None => self.free_head,
        };
        while let Some(current) = cursor {
            if self.sort_key(current) > key {
                break;
            }
            previous = Some(current);
            cursor = self.link(current);
        }
        self.set_link(chunk, cursor);
        match previous {
            Some(previous) => self.set_link(previous, Some(chunk)),
            None => self.free_head = Some(chunk),
        }
        if let Some(page) = self.page_mut(chunk.page) {
            if !matches!(page.first_free, Some(first) if first < chunk.chunk) {
                page.first_free = Some(chunk.chunk);
            }
        }
    }

    /// Lowest free chunk of the highest page whose lowest free chunk lies
    /// below `key`. `None` when the chunk belongs at the list head.
    ///
    /// Pages are walked in address order up to the page containing `key`.
    fn sorted_anchor(&self, key: usize) -> Option<ChunkHandle> {
        let mut anchor = None;
        let mut cursor = self.page_head;
        while let Some(slot) = cursor {
            let Some(page) = self.page(slot) else { break };
            if page.base_address() > key {
                break;
            }
            if let Some(first) = page.first_free {
                let candidate = ChunkHandle::new(slot, first);
                if self.sort_key(candidate) < key {
                    anchor = Some(candidate);
                }
            }
            cursor = page.next;
        }
        anchor
    }

    /// Frees every page whose chunks are all free. Returns how many.
    pub(crate) fn shrink(&mut self) -> usize {
        let per_page = self.layout.chunks_per_page;
        let is_empty_page = |core: &Self, slot: u32| core.page(slot).is_some_and(|p| p.free == per_page);

        let mut previous: Option<ChunkHandle> = None;
        let mut cursor = self.free_head;
        while let Some(current) = cursor {
            let next = self.link(current);
            if is_empty_page(self, current.page) {
                match previous {
                    Some(previous) => self.set_link(previous, next),
                    None => self.free_head = next,
                }
            } else {
                previous = Some(current);
            }
            cursor = next;
        }

        let mut removed = 0;
        let mut previous: Option<u32> = None;
        let mut cursor = self.page_head;
        while let Some(current) = cursor {
            let next = self.page(current).and_then(|p| p.next);
            if is_empty_page(self, current) {
                match previous {
                    Some(previous) => {
                        if let Some(page) = self.page_mut(previous) {
                            page.next = next;
                        }
                    }
                    None => self.page_head = next,
                }
                if let Some(page) = self.pages[current as usize].take() {
                    self.tracker.free(page.len());
                }
                self.vacant.push(current);
                self.page_count -= 1;
                removed += 1;
            } else {
                previous = Some(current);
            }
            cursor = next;
        }
        if removed > 0 {
            tracing::debug!(removed, pages = self.page_count, "pool shrunk");
        }
        removed
    }

    pub(crate) fn clear(&mut self) {
        self.tracker.release(self.used * self.layout.chunk_size);
        for page in self.pages.drain(..).flatten() {
            self.tracker.free(page.len());
        }
        self.vacant.clear();
        self.page_head = None;
        self.free_head = None;
        self.page_count = 0;
        self.used = 0;
    }

    pub(crate) fn free_chunks(&self) -> FreeChunks<'_> {
        FreeChunks {
            core: self,
            next: self.free_head,
        }
    }
}

impl Drop for PoolCore {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Walks a pool's free list from its head.
pub struct FreeChunks<'a> {
    core: &'a PoolCore,
    next: Option<ChunkHandle>,
}

impl Iterator for FreeChunks<'_> {
    type Item = ChunkHandle;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self.core.link(current);
        Some(current)
    }
}
