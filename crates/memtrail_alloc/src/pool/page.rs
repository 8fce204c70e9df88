//! One page of chunks.
//!
//! The first chunk starts at the first `chunk_align`-aligned address inside
//! the page buffer; the layout reserves `chunk_align - 1` bytes of slack for
//! this. A free chunk stores its free-list link in its first eight bytes.

use crate::config::{ChunkLayout, LINK_SIZE};

pub(crate) struct Page {
    storage: Box<[u8]>,
    /// Offset of chunk 0 inside `storage`.
    first: usize,
    /// Next page slot in the pool's page list.
    pub(crate) next: Option<u32>,
    /// Free chunks currently in this page.
    pub(crate) free: usize,
    /// Index of the lowest free chunk. Kept by ordered pools only.
    pub(crate) first_free: Option<u32>,
}

impl Page {
    /// Allocates a zeroed page. `None` when the allocation fails.
    pub(crate) fn allocate(layout: &ChunkLayout) -> Option<Self> {
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(layout.page_bytes).ok()?;
        buffer.resize(layout.page_bytes, 0);
        let storage = buffer.into_boxed_slice();
        let address = storage.as_ptr() as usize;
        let first = address.wrapping_neg() & (layout.chunk_align - 1);
        Some(Self {
            storage,
            first,
            next: None,
            free: layout.chunks_per_page,
            first_free: Some(0),
        })
    }

    /// Total bytes held by this page.
    pub(crate) fn len(&self) -> usize {
        self.storage.len()
    }

    /// Address of chunk 0.
    pub(crate) fn base_address(&self) -> usize {
        self.storage.as_ptr() as usize + self.first
    }

    fn offset(&self, layout: &ChunkLayout, index: u32) -> usize {
        self.first + index as usize * layout.stride
    }

    pub(crate) fn chunk(&self, layout: &ChunkLayout, index: u32) -> Option<&[u8]> {
        let offset = self.offset(layout, index);
        self.storage.get(offset..offset + layout.chunk_size)
    }

    pub(crate) fn chunk_mut(&mut self, layout: &ChunkLayout, index: u32) -> Option<&mut [u8]> {
        let offset = self.offset(layout, index);
        self.storage.get_mut(offset..offset + layout.chunk_size)
    }

    pub(crate) fn read_link(&self, layout: &ChunkLayout, index: u32) -> u64 {
        let mut link = [u8::MAX; LINK_SIZE];
        if let Some(bytes) = self.chunk(layout, index) {
            link.copy_from_slice(&bytes[..LINK_SIZE]);
        }
        u64::from_le_bytes(link)
    }

    pub(crate) fn write_link(&mut self, layout: &ChunkLayout, index: u32, link: u64) {
        if let Some(bytes) = self.chunk_mut(layout, index) {
            bytes[..LINK_SIZE].copy_from_slice(&link.to_le_bytes());
        }
    }
}
