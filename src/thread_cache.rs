//! Thread cache (front end): per-thread free lists, no locks.
//!
//! Every thread owns a private array of free lists, one per size class, so
//! the warm path touches only thread-local state. Misses fetch a batch
//! from the central cache under slow start: a cold list asks for one
//! object, and each further miss asks for one more, up to the class's
//! batch cap. Frees push locally and evict a batch back to the central
//! cache once a list reaches its cap.

use crate::central_cache::CentralCache;
use crate::free_list::{FreeList, FreeObject};
use crate::page_cache::PageCache;
use crate::page_map::PageMap;
use crate::size_class::{self, FREE_LIST_NUM, MAX_BYTES};
use crate::stat_inc;
use crate::sync::SpinMutex;
use core::ptr;

pub struct ThreadCache {
    lists: [FreeList; FREE_LIST_NUM],
}

impl Default for ThreadCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadCache {
    /// Const-constructible so it can live in const-initialized TLS; a
    /// fresh cache is immediately usable (all caps start at 1).
    pub const fn new() -> Self {
        Self {
            lists: [const { FreeList::new() }; FREE_LIST_NUM],
        }
    }

    /// Allocate `size` bytes (`0 < size <= MAX_BYTES`). Returns null only
    /// on OOM.
    ///
    /// # Safety
    ///
    /// `central` and `page_cache` must be the instances every caller
    /// shares.
    pub unsafe fn allocate(
        &mut self,
        size: usize,
        central: &CentralCache,
        page_cache: &SpinMutex<PageCache>,
    ) -> *mut u8 {
        assert!(size > 0 && size <= MAX_BYTES);
        let aligned = size_class::round_up(size);
        let idx = size_class::index(size);

        let list = &mut self.lists[idx];
        if !list.is_empty() {
            return unsafe { list.pop() } as *mut u8;
        }
        unsafe { self.fetch_from_central(idx, aligned, central, page_cache) }
    }

    /// Return an object of (aligned) `size` to this cache; evict a batch
    /// to the central cache if the list has grown past its cap.
    ///
    /// # Safety
    ///
    /// `ptr` must have been allocated with this class's size and be unused
    /// by the caller from here on.
    pub unsafe fn deallocate(
        &mut self,
        ptr: *mut u8,
        size: usize,
        central: &CentralCache,
        page_cache: &SpinMutex<PageCache>,
        pagemap: &PageMap,
    ) {
        assert!(!ptr.is_null());
        let idx = size_class::index(size);

        let list = &mut self.lists[idx];
        unsafe { list.push(ptr as *mut FreeObject) };

        if list.size() >= list.max_size() {
            unsafe { self.list_too_long(idx, size, central, page_cache, pagemap) };
        }
    }

    /// Miss path: fetch a slow-start-sized batch, keep the tail, hand the
    /// head to the caller.
    #[cold]
    unsafe fn fetch_from_central(
        &mut self,
        idx: usize,
        aligned: usize,
        central: &CentralCache,
        page_cache: &SpinMutex<PageCache>,
    ) -> *mut u8 {
        stat_inc!(thread_cache_misses);
        let list = &mut self.lists[idx];

        let batch = list.max_size().min(size_class::num_move_size(aligned));
        if batch == list.max_size() {
            // Still ramping: ask for one more next time.
            list.grow_max_size();
        }

        let (actual, start, end) = unsafe { central.fetch_range(batch, aligned, page_cache) };
        if actual == 0 {
            return ptr::null_mut();
        }

        if actual > 1 {
            unsafe { list.push_range((*start).next, end, actual - 1) };
        }
        start as *mut u8
    }

    /// Evict one cap's worth of objects back to the central cache.
    unsafe fn list_too_long(
        &mut self,
        idx: usize,
        size: usize,
        central: &CentralCache,
        page_cache: &SpinMutex<PageCache>,
        pagemap: &PageMap,
    ) {
        let list = &mut self.lists[idx];
        let (start, _end) = unsafe { list.pop_range(list.max_size()) };
        unsafe { central.release_list_to_spans(start, size, page_cache, pagemap) };
    }

    /// Return everything this cache holds to the central cache. Called
    /// when the owning thread exits.
    ///
    /// # Safety
    ///
    /// No object from this cache may be handed out afterwards.
    pub unsafe fn flush(
        &mut self,
        central: &CentralCache,
        page_cache: &SpinMutex<PageCache>,
        pagemap: &PageMap,
    ) {
        for idx in 0..FREE_LIST_NUM {
            let list = &mut self.lists[idx];
            if list.is_empty() {
                continue;
            }
            let (start, _end) = unsafe { list.pop_range(list.size()) };
            let size = size_class::class_to_size(idx);
            unsafe { central.release_list_to_spans(start, size, page_cache, pagemap) };
        }
    }

    #[cfg(test)]
    fn list_size(&self, idx: usize) -> usize {
        self.lists[idx].size()
    }

    #[cfg(test)]
    fn list_cap(&self, idx: usize) -> usize {
        self.lists[idx].max_size()
    }
}
