//! Central cache (middle end): per-size-class span buckets.
//!
//! Each size class has a bucket of sliced spans under its own lock, so
//! contention is per class. Thread caches fetch and return objects in
//! batches; a span goes back to the page cache the moment its last object
//! returns.
//!
//! Lock discipline: a thread holds at most one bucket lock or the page
//! lock, never both. Both slow paths here drop the bucket lock before
//! touching the page cache and reacquire it afterwards, so a thread
//! freeing into the bucket can proceed while another waits on the OS.

use crate::config::PAGE_SHIFT;
use crate::free_list::FreeObject;
use crate::page_cache::PageCache;
use crate::page_map::PageMap;
use crate::size_class::{self, FREE_LIST_NUM};
use crate::span::{Span, SpanList};
use crate::sync::SpinMutex;
use core::ptr;
#[cfg(feature = "debug")]
use std::println;

/// One size class's spans. Holds every span the class owns, full or not;
/// `fetch_range` scans for one with objects left.
struct SpanBucket {
    spans: SpanList,
}

// SAFETY: only accessed through the per-bucket SpinMutex.
unsafe impl Send for SpanBucket {}

impl SpanBucket {
    const fn new() -> Self {
        Self {
            spans: SpanList::new(),
        }
    }

    /// First span with a non-empty free list, or null.
    unsafe fn find_nonempty(&self) -> *mut Span {
        let mut it = self.spans.head;
        while !it.is_null() {
            if unsafe { !(*it).free_list.is_null() } {
                return it;
            }
            it = unsafe { (*it).next };
        }
        ptr::null_mut()
    }
}

/// Process-wide array of per-class buckets.
pub struct CentralCache {
    buckets: [SpinMutex<SpanBucket>; FREE_LIST_NUM],
}

impl Default for CentralCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CentralCache {
    pub const fn new() -> Self {
        Self {
            buckets: [const { SpinMutex::new(SpanBucket::new()) }; FREE_LIST_NUM],
        }
    }

    /// Detach up to `batch` objects of the class for `size` as a chain
    /// `(actual, start, end)` with `actual >= 1`, fetching and slicing a
    /// fresh span from the page cache when the bucket runs dry. Returns
    /// `actual == 0` only on OOM.
    ///
    /// # Safety
    ///
    /// `size` must be a class-aligned size in `[8, MAX_BYTES]`, and
    /// `page_cache` must be the instance every caller shares.
    pub unsafe fn fetch_range(
        &self,
        batch: usize,
        size: usize,
        page_cache: &SpinMutex<PageCache>,
    ) -> (usize, *mut FreeObject, *mut FreeObject) {
        assert!(batch >= 1);
        let idx = size_class::index(size);

        loop {
            // Phase 1: cut from an existing span, bucket lock held.
            {
                let bucket = self.buckets[idx].lock();
                let span = unsafe { bucket.find_nonempty() };
                if !span.is_null() {
                    unsafe {
                        let start = (*span).free_list;
                        let mut end = start;
                        let mut actual = 1;
                        while actual < batch && !(*end).next.is_null() {
                            end = (*end).next;
                            actual += 1;
                        }
                        (*span).free_list = (*end).next;
                        (*end).next = ptr::null_mut();
                        (*span).use_count += actual;
                        return (actual, start, end);
                    }
                }
            }
            // Bucket lock dropped: threads freeing into this class and
            // threads waiting on the page lock cannot deadlock us.

            // Phase 2: acquire a span under the page lock only.
            let k = size_class::num_move_pages(size);
            let span = {
                let mut pc = page_cache.lock();
                let span = unsafe { pc.new_span(k) };
                if span.is_null() {
                    return (0, ptr::null_mut(), ptr::null_mut());
                }
                unsafe {
                    (*span).in_use = true;
                    (*span).obj_size = size;
                }
                span
            };

            // Phase 3: slice the span's pages into a chain of objects,
            // no lock held; nobody can see this span yet.
            unsafe {
                let base = (*span).start_addr();
                let count = (*span).byte_size() / size;

                #[cfg(feature = "debug")]
                println!("[fetch_range] slicing {} objects of {} B", count, size);
                let mut head: *mut FreeObject = ptr::null_mut();
                for i in (0..count).rev() {
                    let obj = base.add(i * size) as *mut FreeObject;
                    (*obj).next = head;
                    head = obj;
                }
                (*span).free_list = head;
            }

            // Phase 4: hang it in the bucket and go cut from it.
            {
                let mut bucket = self.buckets[idx].lock();
                unsafe { bucket.spans.push_front(span) };
            }
        }
    }

    /// Return a chain of objects of the class for `size`, each to the span
    /// it was sliced from. A span whose use count hits zero is unhooked
    /// and handed back to the page cache (bucket lock dropped around the
    /// handoff).
    ///
    /// # Safety
    ///
    /// `start` must be a null-terminated chain of objects previously
    /// fetched from this class; `size` must match their class.
    pub unsafe fn release_list_to_spans(
        &self,
        start: *mut FreeObject,
        size: usize,
        page_cache: &SpinMutex<PageCache>,
        pagemap: &PageMap,
    ) {
        let idx = size_class::index(size);
        let mut bucket = self.buckets[idx].lock();

        let mut cur = start;
        while !cur.is_null() {
            let next = unsafe { (*cur).next };

            let span = pagemap.get((cur as usize) >> PAGE_SHIFT);
            assert!(!span.is_null(), "freed object belongs to no span");

            unsafe {
                (*cur).next = (*span).free_list;
                (*span).free_list = cur;
                assert!((*span).use_count > 0, "span use count underflow");
                (*span).use_count -= 1;

                if (*span).use_count == 0 {
                    // Whole span is back; give it to the page cache. The
                    // handoff takes the page lock, so let the bucket go
                    // first and pick it up again after.
                    bucket.spans.remove(span);
                    (*span).free_list = ptr::null_mut();
                    drop(bucket);
                    {
                        let mut pc = page_cache.lock();
                        pc.release_span(span);
                    }
                    bucket = self.buckets[idx].lock();
                }
            }

            cur = next;
        }
    }

    /// Spans currently owned by the class for `size`.
    #[cfg(test)]
    fn span_count(&self, size: usize) -> usize {
        self.buckets[size_class::index(size)].lock().spans.len
    }
}
