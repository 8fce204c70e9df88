//! # MEMTRAIL Alloc
//!
//! Pool and stack allocators that report every byte they reserve and hand
//! out to a [`memtrail_profile::AllocationGroup`].
//!
//! ## Allocators
//!
//! | Type | Shape | Release |
//! |------|-------|---------|
//! | [`UnorderedPool`] | fixed-size chunks, paged | O(1), LIFO |
//! | [`OrderedPool`] | fixed-size chunks, paged, address-sorted | O(free chunks) |
//! | [`StackAllocator`] | one buffer, bump pointer | rewind to a [`Checkpoint`] |
//!
//! An allocator built without an explicit group reports to whatever
//! [`memtrail_profile::top`] returns at construction time.
//!
//! ## Example
//!
//! ```rust,ignore
//! use memtrail_alloc::{ChunkPool, PoolConfig, UnorderedPool};
//! use memtrail_profile::AllocationGroup;
//!
//! let _scope = AllocationGroup::get("Physics/Contacts").place_on_top();
//! let mut contacts = UnorderedPool::new(&PoolConfig::for_type::<[f32; 8]>(256))?;
//! let contact = contacts.acquire()?;
//! contacts.write(contact, [0.0_f32; 8]);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod pool;
pub mod stack;
mod tracker;

pub use config::{ChunkLayout, PoolConfig, StackConfig, LINK_SIZE};
pub use error::{PoolError, PoolResult, StackError, StackResult};
pub use pool::{ChunkHandle, ChunkPool, FreeChunks, OrderedPool, UnorderedPool, UsedChunks};
pub use stack::{Checkpoint, StackAllocation, StackAllocator};
