//! # Allocator Error Types
//!
//! Configuration errors reject construction. Capacity errors are returned
//! to the caller and never retried here.

use thiserror::Error;

/// Errors raised by the pool allocators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Chunk size, alignment or page shape is unusable.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// A new page could not be obtained (out of memory or page limit).
    #[error("page allocation of {bytes} bytes failed with {pages} pages live")]
    PageAllocation {
        /// Size of the page that was requested.
        bytes: usize,
        /// Pages owned by the pool at the time.
        pages: usize,
    },
}

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors raised by the stack allocator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    /// Capacity is unusable, or the buffer could not be allocated.
    #[error("invalid stack configuration: {0}")]
    InvalidConfig(String),

    /// Alignment is zero or not a power of two.
    #[error("alignment {0} is not a power of two")]
    InvalidAlignment(usize),

    /// The aligned request does not fit in the remaining space.
    #[error("stack out of capacity: requested {requested} bytes, {free} free")]
    OutOfCapacity {
        /// Bytes needed, alignment padding included.
        requested: usize,
        /// Bytes left before the request.
        free: usize,
    },
}

/// Result type for stack operations.
pub type StackResult<T> = Result<T, StackError>;
