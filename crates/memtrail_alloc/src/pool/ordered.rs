//! # Ordered Pool
//!
//! Pages and free chunks stay sorted by address. Acquire always returns
//! the lowest free address. Release finds its place by a linear scan that
//! starts at the nearest page anchor (the lowest free chunk of the closest
//! page below), so it walks one page's free chunks rather than the list.

use memtrail_profile::AllocationGroup;

use super::{ChunkHandle, ChunkPool, FreeChunks, PoolCore};
use crate::config::PoolConfig;
use crate::error::PoolResult;

/// Address-ordered fixed-chunk pool.
pub struct OrderedPool {
    core: PoolCore,
}

impl OrderedPool {
    /// Creates a pool attributed to the thread's current allocation group.
    ///
    /// # Errors
    ///
    /// Returns [`crate::PoolError::InvalidConfig`] for an unusable configuration.
    pub fn new(config: &PoolConfig) -> PoolResult<Self> {
        Ok(Self {
            core: PoolCore::new(config, None)?,
        })
    }

    /// Creates a pool attributed to `group`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::PoolError::InvalidConfig`] for an unusable configuration.
    pub fn with_group(config: &PoolConfig, group: AllocationGroup) -> PoolResult<Self> {
        Ok(Self {
            core: PoolCore::new(config, Some(group))?,
        })
    }

    /// Group this pool reports to.
    #[must_use]
    pub const fn group(&self) -> &AllocationGroup {
        self.core.group()
    }

    /// Frees every page with no chunk in use. Returns the number freed.
    pub fn shrink(&mut self) -> usize {
        self.core.shrink()
    }

    /// Free chunks in ascending address order.
    #[must_use]
    pub fn free_chunks(&self) -> FreeChunks<'_> {
        self.core.free_chunks()
    }

    /// Chunks in use, in ascending address order.
    ///
    /// Walks pages and the free list side by side, so this costs one pass
    /// over the pool regardless of how many chunks are free.
    #[must_use]
    pub fn iter_used(&self) -> UsedChunks<'_> {
        UsedChunks {
            core: &self.core,
            page: self.core.page_head(),
            index: 0,
            next_free: self.core.free_head(),
            remaining: self.core.used(),
        }
    }
}

impl ChunkPool for OrderedPool {
    #[inline]
    fn acquire(&mut self) -> PoolResult<ChunkHandle> {
        self.core.acquire(true)
    }

    fn release(&mut self, chunk: ChunkHandle) {
        self.core.release_sorted(chunk);
    }

    fn is_empty(&self) -> bool {
        self.core.used() == 0
    }

    fn clear(&mut self) {
        self.core.clear();
    }

    fn used_count(&self) -> usize {
        self.core.used()
    }

    fn page_count(&self) -> usize {
        self.core.page_count()
    }

    fn chunk_size(&self) -> usize {
        self.core.layout().chunk_size
    }

    fn address(&self, chunk: ChunkHandle) -> Option<usize> {
        self.core.address(chunk)
    }

    fn bytes(&self, chunk: ChunkHandle) -> Option<&[u8]> {
        self.core.bytes(chunk)
    }

    fn bytes_mut(&mut self, chunk: ChunkHandle) -> Option<&mut [u8]> {
        self.core.bytes_mut(chunk)
    }
}

/// Iterator over the used chunks of an [`OrderedPool`].
pub struct UsedChunks<'a> {
    core: &'a PoolCore,
    page: Option<u32>,
    index: u32,
    next_free: Option<ChunkHandle>,
    remaining: usize,
}

impl Iterator for UsedChunks<'_> {
    type Item = ChunkHandle;

    fn next(&mut self) -> Option<Self::Item> {
        let per_page = self.core.layout().chunks_per_page;
        while self.remaining > 0 {
            let slot = self.page?;
            if self.index as usize >= per_page {
                self.page = self.core.page(slot).and_then(|page| page.next);
                self.index = 0;
                continue;
            }
            let chunk = ChunkHandle::new(slot, self.index);
            self.index += 1;
            if self.next_free == Some(chunk) {
                self.next_free = self.core.link(chunk);
                continue;
            }
            self.remaining -= 1;
            return Some(chunk);
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for UsedChunks<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use memtrail_profile::{Profiler, ProfilerConfig, Totals};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn group(path: &str) -> AllocationGroup {
        Profiler::new(ProfilerConfig::default()).unwrap().group(path)
    }

    fn pool() -> OrderedPool {
        OrderedPool::with_group(&PoolConfig::new(16, 8, 4), group("Test/Ordered")).unwrap()
    }

    fn addresses(pool: &OrderedPool, chunks: impl Iterator<Item = ChunkHandle>) -> Vec<usize> {
        chunks.map(|chunk| pool.address(chunk).unwrap()).collect()
    }

    fn is_ascending(values: &[usize]) -> bool {
        values.windows(2).all(|pair| pair[0] < pair[1])
    }

    /// Every page's anchor is its lowest free chunk.
    fn assert_anchors_match(pool: &OrderedPool) {
        let free: Vec<_> = pool.free_chunks().collect();
        let mut slot = pool.core.page_head();
        while let Some(current) = slot {
            let page = pool.core.page(current).unwrap();
            let lowest = free
                .iter()
                .filter(|chunk| chunk.page() == current)
                .map(|chunk| chunk.index())
                .min();
            assert_eq!(page.first_free, lowest, "page {current}");
            slot = page.next;
        }
    }

    #[test]
    fn test_acquire_returns_lowest_free_address() {
        let mut pool = pool();
        let chunks: Vec<_> = (0..5).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(pool.page_count(), 2);

        pool.release(chunks[2]);
        let lowest = *addresses(&pool, pool.free_chunks()).first().unwrap();
        let again = pool.acquire().unwrap();
        assert_eq!(pool.address(again), Some(lowest));
        assert_eq!(pool.used_count(), 5);
    }

    #[test]
    fn test_release_keeps_free_list_sorted() {
        let mut pool = pool();
        let chunks: Vec<_> = (0..12).map(|_| pool.acquire().unwrap()).collect();
        for &index in &[7, 1, 11, 4, 0, 9] {
            pool.release(chunks[index]);
        }
        let free = addresses(&pool, pool.free_chunks());
        assert_eq!(free.len(), 6);
        assert!(is_ascending(&free));
    }

    #[test]
    fn test_releases_across_pages_stay_sorted() {
        let mut pool =
            OrderedPool::with_group(&PoolConfig::new(16, 8, 4), group("Interleaved")).unwrap();
        let chunks: Vec<_> = (0..24).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(pool.page_count(), 6);
        assert_anchors_match(&pool);

        let order = [21, 2, 13, 6, 17, 0, 23, 9, 4, 14, 19, 1, 11, 22, 7, 16, 3];
        for (step, &index) in order.iter().enumerate() {
            pool.release(chunks[index]);
            let free = addresses(&pool, pool.free_chunks());
            assert_eq!(free.len(), step + 1);
            assert!(is_ascending(&free));
            assert_anchors_match(&pool);
        }

        let mut released = addresses(&pool, order.iter().map(|&index| chunks[index]));
        released.sort_unstable();
        assert_eq!(addresses(&pool, pool.free_chunks()), released);

        let again: Vec<_> = (0..order.len()).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(addresses(&pool, again.into_iter()), released);
        assert_eq!(pool.page_count(), 6);
        assert_anchors_match(&pool);
    }

    #[test]
    fn test_iter_used_is_sorted_and_disjoint() {
        let mut pool = pool();
        let chunks: Vec<_> = (0..10).map(|_| pool.acquire().unwrap()).collect();
        for &index in &[0, 3, 4, 9] {
            pool.release(chunks[index]);
        }

        let used: Vec<_> = pool.iter_used().collect();
        assert_eq!(used.len(), pool.used_count());
        assert_eq!(pool.iter_used().len(), 6);
        assert!(is_ascending(&addresses(&pool, used.iter().copied())));

        let free: Vec<_> = pool.free_chunks().collect();
        assert!(used.iter().all(|chunk| !free.contains(chunk)));
        assert_eq!(used.len() + free.len(), pool.page_count() * 4);
    }

    #[test]
    fn test_shrink_frees_idle_pages() {
        let group = group("Shrink");
        let layout = PoolConfig::new(16, 8, 4).layout().unwrap();
        let mut pool = OrderedPool::with_group(&PoolConfig::new(16, 8, 4), group.clone()).unwrap();
        let chunks: Vec<_> = (0..12).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(pool.page_count(), 3);

        // Empty exactly one page, the one holding chunks[4..8].
        let target = chunks[4].page();
        for &chunk in chunks.iter().filter(|chunk| chunk.page() == target) {
            pool.release(chunk);
        }
        pool.release(chunks[0]);

        assert_eq!(pool.shrink(), 1);
        assert_eq!(pool.page_count(), 2);
        assert_eq!(pool.shrink(), 0);
        assert_eq!(
            group.stats().own,
            Totals::new(2 * layout.page_bytes as u64, 7 * 16)
        );

        let free = addresses(&pool, pool.free_chunks());
        assert_eq!(free.len(), 1);
        assert_eq!(pool.iter_used().count(), 7);

        // The vacant page slot is reused.
        let more: Vec<_> = (0..5).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(pool.page_count(), 3);
        assert!(more.iter().any(|chunk| chunk.page() == target));
        assert!(is_ascending(&addresses(&pool, pool.iter_used())));
        assert_anchors_match(&pool);
    }

    #[test]
    fn test_random_history_keeps_order() {
        let mut pool = OrderedPool::with_group(&PoolConfig::new(32, 16, 8), group("Random")).unwrap();
        let mut rng = StdRng::seed_from_u64(0x5EED);
        let mut live = Vec::new();
        for step in 0..1_500 {
            if live.is_empty() || rng.gen_bool(0.6) {
                live.push(pool.acquire().unwrap());
            } else {
                let index = rng.gen_range(0..live.len());
                pool.release(live.swap_remove(index));
            }
            if step % 250 == 0 {
                pool.shrink();
            }
        }

        assert_eq!(pool.used_count(), live.len());
        assert!(is_ascending(&addresses(&pool, pool.free_chunks())));
        assert_anchors_match(&pool);

        let mut expected = addresses(&pool, live.iter().copied());
        expected.sort_unstable();
        assert_eq!(addresses(&pool, pool.iter_used()), expected);
    }

    #[test]
    fn test_clear_resets_pool() {
        let group = group("Clear");
        let mut pool = OrderedPool::with_group(&PoolConfig::new(16, 8, 4), group.clone()).unwrap();
        for _ in 0..6 {
            pool.acquire().unwrap();
        }
        pool.clear();
        assert!(pool.is_empty());
        assert_eq!(pool.page_count(), 0);
        assert_eq!(pool.iter_used().count(), 0);
        assert_eq!(group.stats().own, Totals::ZERO);
    }
}
