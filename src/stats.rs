//! Allocation statistics counters.
//!
//! All counters use `Relaxed` ordering; they are observational only, and the
//! allocator's own locks provide every ordering guarantee that matters for
//! correctness.
//!
//! Obtain a [`Snapshot`] with [`snapshot()`]. Individual counter loads are
//! atomic but not globally consistent with each other.

use core::sync::atomic::{AtomicU64, Ordering};

pub(crate) struct Stats {
    /// Calls to `concurrent_alloc` (and the `GlobalAlloc` fast path).
    pub alloc_count: AtomicU64,
    /// Calls to `concurrent_free`.
    pub dealloc_count: AtomicU64,
    /// Sum of requested byte sizes.
    pub alloc_bytes: AtomicU64,
    /// Requests routed past the cache tiers straight to the page cache.
    pub page_direct_allocs: AtomicU64,
    /// Thread-cache misses (batch fetches from the central cache).
    pub thread_cache_misses: AtomicU64,
    /// Calls into `platform::alloc_pages` from the page cache.
    pub os_alloc_count: AtomicU64,
    /// Spans split while serving `new_span`.
    pub span_splits: AtomicU64,
    /// Idle neighbour merges performed on release.
    pub span_coalesces: AtomicU64,
}

impl Stats {
    const fn new() -> Self {
        Self {
            alloc_count: AtomicU64::new(0),
            dealloc_count: AtomicU64::new(0),
            alloc_bytes: AtomicU64::new(0),
            page_direct_allocs: AtomicU64::new(0),
            thread_cache_misses: AtomicU64::new(0),
            os_alloc_count: AtomicU64::new(0),
            span_splits: AtomicU64::new(0),
            span_coalesces: AtomicU64::new(0),
        }
    }
}

pub(crate) static STATS: Stats = Stats::new();

/// A point-in-time copy of every counter.
#[derive(Clone, Copy, Debug, Default)]
pub struct Snapshot {
    pub alloc_count: u64,
    pub dealloc_count: u64,
    pub alloc_bytes: u64,
    pub page_direct_allocs: u64,
    pub thread_cache_misses: u64,
    pub os_alloc_count: u64,
    pub span_splits: u64,
    pub span_coalesces: u64,
}

/// Read all counters.
pub fn snapshot() -> Snapshot {
    Snapshot {
        alloc_count: STATS.alloc_count.load(Ordering::Relaxed),
        dealloc_count: STATS.dealloc_count.load(Ordering::Relaxed),
        alloc_bytes: STATS.alloc_bytes.load(Ordering::Relaxed),
        page_direct_allocs: STATS.page_direct_allocs.load(Ordering::Relaxed),
        thread_cache_misses: STATS.thread_cache_misses.load(Ordering::Relaxed),
        os_alloc_count: STATS.os_alloc_count.load(Ordering::Relaxed),
        span_splits: STATS.span_splits.load(Ordering::Relaxed),
        span_coalesces: STATS.span_coalesces.load(Ordering::Relaxed),
    }
}
