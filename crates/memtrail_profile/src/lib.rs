//! # MEMTRAIL Profile
//!
//! Hierarchical memory accounting and the event stream that records it.
//!
//! ## Architecture
//!
//! ```text
//! Pool / Stack ──report──► AllocationGroup ──► Profiler (one lock)
//!                                                 │
//!                                   ┌─────────────┴─────────────┐
//!                                   │  group arena │ event queue │
//!                                   └─────────────┬─────────────┘
//!                                                 │ poll
//!                                      ┌──────────┼──────────┐
//!                                   Observer   Observer   Observer
//! ```
//!
//! Every reporting call updates the group's totals and the totals of all
//! its ancestors, then appends exactly one [`Event`] to the queue. Each
//! [`Observer`] reads the queue through its own cursor.
//!
//! ## Example
//!
//! ```rust,ignore
//! use memtrail_profile::{AllocationGroup, top};
//!
//! let render = AllocationGroup::get("Render/Meshes");
//! let _scope = render.place_on_top();
//! // Allocators built here report to "Render/Meshes".
//! assert_eq!(top(), render);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod group;
pub mod profiler;
mod queue;

pub use config::ProfilerConfig;
pub use context::{mark, place_on_top, top, TopGuard};
pub use error::{AccountingError, ProfileError, ProfileResult};
pub use event::{Event, EventKind, EventPayload, GroupDeclaration, GroupId, Totals};
pub use group::{AllocationGroup, GroupSnapshot, GroupStats};
pub use profiler::{Observer, Profiler};
