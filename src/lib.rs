#![no_std]

//! cmpool: a concurrent, tiered, thread-caching memory allocator.
//!
//! Allocation requests flow through three tiers, each servicing the caller
//! locally when possible:
//! - Thread cache: per-thread free lists, no locks (requires `std`, default on)
//! - Central cache: per-size-class span buckets, one lock per bucket
//! - Page cache: span splitting/coalescing and the OS boundary, one lock
//!
//! # Usage
//!
//! ```ignore
//! #[global_allocator]
//! static GLOBAL: cmpool::CmPool = cmpool::CmPool;
//! ```
//!
//! or call [`concurrent_alloc`] / [`concurrent_free`] directly.

#[cfg(test)]
extern crate alloc;
#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod allocator;
pub mod central_cache;
pub mod free_list;
mod macros;
pub mod object_pool;
pub mod page_cache;
pub mod page_map;
pub mod platform;
pub mod size_class;
pub mod span;
#[cfg(feature = "stats")]
pub mod stats;
pub mod sync;
pub mod thread_cache;

pub(crate) mod config {
    include!(concat!(env!("OUT_DIR"), "/config_gen.rs"));
}

/// Allocator page size in bytes (8 KiB by default; see cmpool.toml).
pub const PAGE_SIZE: usize = config::PAGE_SIZE;
/// log2 of [`PAGE_SIZE`]. A page ID is an address shifted right by this.
pub const PAGE_SHIFT: usize = config::PAGE_SHIFT;

pub use allocator::{CmPool, concurrent_alloc, concurrent_free};
