//! # Allocator Configuration
//!
//! Plain data, usually read from the `[pool]` and `[stack]` tables of
//! `memtrail.toml`. Validation happens when an allocator is built.

use serde::{Deserialize, Serialize};

use crate::error::{PoolError, PoolResult, StackError, StackResult};

/// Size of the free-list link embedded in every free chunk.
pub const LINK_SIZE: usize = std::mem::size_of::<u64>();

/// Pool shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Bytes per chunk. At least [`LINK_SIZE`].
    pub chunk_size: usize,
    /// Alignment of every chunk address. A power of two.
    pub chunk_align: usize,
    /// Chunks carved out of each page.
    pub chunks_per_page: usize,
    /// Upper bound on live pages. `None` means unbounded.
    pub max_pages: Option<usize>,
}

impl PoolConfig {
    /// Creates a configuration with no page limit.
    #[must_use]
    pub const fn new(chunk_size: usize, chunk_align: usize, chunks_per_page: usize) -> Self {
        Self {
            chunk_size,
            chunk_align,
            chunks_per_page,
            max_pages: None,
        }
    }

    /// Creates a configuration whose chunks can hold one `T`.
    #[must_use]
    pub const fn for_type<T>(chunks_per_page: usize) -> Self {
        let size = std::mem::size_of::<T>();
        Self::new(
            if size < LINK_SIZE { LINK_SIZE } else { size },
            std::mem::align_of::<T>(),
            chunks_per_page,
        )
    }

    /// Sets the page limit.
    #[must_use]
    pub const fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    /// Checks the configuration and derives the page layout.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidConfig`] if the chunk cannot hold a
    /// free-list link, the alignment is not a power of two, or a page
    /// would hold no chunks or overflow `usize`.
    pub fn layout(&self) -> PoolResult<ChunkLayout> {
        if self.chunk_size < LINK_SIZE {
            return Err(PoolError::InvalidConfig(format!(
                "chunk size {} is smaller than the {LINK_SIZE}-byte free-list link",
                self.chunk_size
            )));
        }
        if !self.chunk_align.is_power_of_two() {
            return Err(PoolError::InvalidConfig(format!(
                "chunk alignment {} is not a power of two",
                self.chunk_align
            )));
        }
        if self.chunks_per_page == 0 {
            return Err(PoolError::InvalidConfig(
                "chunks_per_page must be greater than zero".to_string(),
            ));
        }
        if self.chunks_per_page >= u32::MAX as usize {
            return Err(PoolError::InvalidConfig(format!(
                "chunks_per_page {} must be below {}",
                self.chunks_per_page,
                u32::MAX
            )));
        }
        if self.max_pages == Some(0) {
            return Err(PoolError::InvalidConfig(
                "max_pages must be greater than zero".to_string(),
            ));
        }

        let overflow = || PoolError::InvalidConfig("page size overflows usize".to_string());
        let stride = self
            .chunk_size
            .checked_next_multiple_of(self.chunk_align)
            .ok_or_else(overflow)?;
        let page_bytes = stride
            .checked_mul(self.chunks_per_page)
            .and_then(|bytes| bytes.checked_add(self.chunk_align - 1))
            .ok_or_else(overflow)?;

        Ok(ChunkLayout {
            chunk_size: self.chunk_size,
            chunk_align: self.chunk_align,
            stride,
            chunks_per_page: self.chunks_per_page,
            page_bytes,
        })
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(64, 8, 64)
    }
}

/// Validated pool geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkLayout {
    /// Usable bytes per chunk.
    pub chunk_size: usize,
    /// Chunk address alignment.
    pub chunk_align: usize,
    /// Distance between consecutive chunk starts.
    pub stride: usize,
    /// Chunks per page.
    pub chunks_per_page: usize,
    /// Bytes allocated per page, alignment slack included.
    pub page_bytes: usize,
}

/// Stack shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StackConfig {
    /// Buffer size in bytes.
    pub capacity: usize,
}

impl StackConfig {
    /// Creates a configuration with the given capacity.
    #[must_use]
    pub const fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StackError::InvalidConfig`] for a zero capacity.
    pub fn validate(&self) -> StackResult<()> {
        if self.capacity == 0 {
            return Err(StackError::InvalidConfig(
                "capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for StackConfig {
    fn default() -> Self {
        Self::new(1024 * 1024)
    }
}
