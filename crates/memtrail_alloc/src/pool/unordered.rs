//! # Unordered Pool
//!
//! Released chunks are pushed onto the free-list head, so a release
//! followed by an acquire hands back the same chunk.

use memtrail_profile::AllocationGroup;

use super::{ChunkHandle, ChunkPool, FreeChunks, PoolCore};
use crate::config::PoolConfig;
use crate::error::PoolResult;

/// O(1) fixed-chunk pool with no ordering guarantees.
///
/// # Example
///
/// ```rust,ignore
/// let mut pool = UnorderedPool::new(&PoolConfig::for_type::<Particle>(1024))?;
/// let chunk = pool.acquire()?;
/// pool.write(chunk, Particle::default());
/// pool.release(chunk);
/// ```
pub struct UnorderedPool {
    core: PoolCore,
}

impl UnorderedPool {
    /// Creates a pool attributed to the thread's current allocation group.
    ///
    /// No memory is allocated until the first acquire.
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

    /// Walks the free list from its head.
    #[must_use]
    pub fn free_chunks(&self) -> FreeChunks<'_> {
        self.core.free_chunks()
    }
}

impl ChunkPool for UnorderedPool {
    #[inline]
    fn acquire(&mut self) -> PoolResult<ChunkHandle> {
        self.core.acquire(false)
    }

    #[inline]
    fn release(&mut self, chunk: ChunkHandle) {
        self.core.release_front(chunk);
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
