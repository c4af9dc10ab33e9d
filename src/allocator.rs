//! Top-level allocator: global state, the public API, and `GlobalAlloc`.
//!
//! All mutable state lives in module statics guarded by spinlocks or
//! atomics; `CmPool` itself is zero-sized.
//!
//! Small requests (<= 256 KiB) flow thread cache -> central cache -> page
//! cache; anything larger goes to the page cache directly. With the `std`
//! feature (default) every thread gets a const-initialized thread-local
//! cache, flushed back to the central cache when the thread exits; without
//! it, all requests take the locked central path.

use crate::PAGE_SIZE;
use crate::central_cache::CentralCache;
use crate::config::PAGE_SHIFT;
use crate::free_list::FreeObject;
use crate::page_cache::PageCache;
use crate::page_map::PageMap;
use crate::size_class::{self, MAX_BYTES};
use crate::sync::SpinMutex;
use crate::{stat_add, stat_inc};
use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

pub(crate) static PAGE_MAP: PageMap = PageMap::new();
pub(crate) static PAGE_CACHE: SpinMutex<PageCache> = SpinMutex::new(PageCache::new(&PAGE_MAP));
pub(crate) static CENTRAL_CACHE: CentralCache = CentralCache::new();

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        use crate::thread_cache::ThreadCache;
        use core::cell::UnsafeCell;

        struct TcSlot(UnsafeCell<ThreadCache>);

        impl Drop for TcSlot {
            fn drop(&mut self) {
                // Thread exit: hand every cached object back so spans can
                // drain to the page cache.
                unsafe {
                    (*self.0.get()).flush(&CENTRAL_CACHE, &PAGE_CACHE, &PAGE_MAP);
                }
            }
        }

        std::thread_local! {
            static TC: TcSlot = const { TcSlot(UnsafeCell::new(ThreadCache::new())) };
        }

        #[inline]
        unsafe fn alloc_small(size: usize) -> *mut u8 {
            match TC.try_with(|slot| unsafe {
                (*slot.0.get()).allocate(size, &CENTRAL_CACHE, &PAGE_CACHE)
            }) {
                Ok(ptr) => ptr,
                // TLS already torn down: take the locked central path.
                Err(_) => unsafe { alloc_from_central(size) },
            }
        }

        #[inline]
        unsafe fn dealloc_small(ptr: *mut u8, size: usize) {
            let served = TC.try_with(|slot| unsafe {
                (*slot.0.get()).deallocate(ptr, size, &CENTRAL_CACHE, &PAGE_CACHE, &PAGE_MAP)
            });
            if served.is_err() {
                unsafe { dealloc_to_central(ptr, size) };
            }
        }
    } else {
        #[inline]
        unsafe fn alloc_small(size: usize) -> *mut u8 {
            unsafe { alloc_from_central(size) }
        }

        #[inline]
        unsafe fn dealloc_small(ptr: *mut u8, size: usize) {
            unsafe { dealloc_to_central(ptr, size) };
        }
    }
}

/// Locked fallback used without a thread cache.
unsafe fn alloc_from_central(size: usize) -> *mut u8 {
    let aligned = size_class::round_up(size);
    let (actual, start, _end) =
        unsafe { CENTRAL_CACHE.fetch_range(1, aligned, &PAGE_CACHE) };
    if actual == 0 {
        ptr::null_mut()
    } else {
        start as *mut u8
    }
}

unsafe fn dealloc_to_central(ptr: *mut u8, size: usize) {
    let obj = ptr as *mut FreeObject;
    unsafe {
        (*obj).next = ptr::null_mut();
        CENTRAL_CACHE.release_list_to_spans(obj, size, &PAGE_CACHE, &PAGE_MAP);
    }
}

/// Page-direct path: whole pages from the page cache, no slicing. The span
/// is marked in use and carries its byte size so `concurrent_free` can
/// route it back here and coalescing leaves it alone.
unsafe fn alloc_page_direct(size: usize) -> *mut u8 {
    stat_inc!(page_direct_allocs);
    let aligned = size_class::round_up(size);
    let k = aligned >> PAGE_SHIFT;

    let mut pc = PAGE_CACHE.lock();
    let span = unsafe { pc.new_span(k) };
    if span.is_null() {
        return ptr::null_mut();
    }
    unsafe {
        (*span).in_use = true;
        (*span).obj_size = (*span).num_pages << PAGE_SHIFT;
        (*span).start_addr()
    }
}

/// Allocate at least `size` bytes (`size > 0`). Returns null on OOM.
///
/// Requests up to 256 KiB are aligned to their size class (8 bytes and
/// up); larger ones are page-aligned and served straight from the page
/// cache.
pub fn concurrent_alloc(size: usize) -> *mut u8 {
    assert!(size > 0, "zero-size allocation");
    stat_inc!(alloc_count);
    stat_add!(alloc_bytes, size as u64);

    if size > MAX_BYTES {
        return unsafe { alloc_page_direct(size) };
    }
    unsafe { alloc_small(size) }
}

/// Return a pointer obtained from [`concurrent_alloc`]. The object's size
/// is recovered from its span, so none is passed. Panics on a pointer this
/// allocator never issued; silently tolerating one would mask heap
/// corruption.
pub fn concurrent_free(ptr: *mut u8) {
    assert!(!ptr.is_null());
    stat_inc!(dealloc_count);

    let span = PAGE_MAP.get((ptr as usize) >> PAGE_SHIFT);
    assert!(!span.is_null(), "freed pointer was not allocated here");

    let size = unsafe { (*span).obj_size };
    if size > MAX_BYTES {
        let mut pc = PAGE_CACHE.lock();
        unsafe { pc.release_span(span) };
    } else {
        unsafe { dealloc_small(ptr, size) };
    }
}

/// Thread-caching allocator for Rust.
///
/// Register as the global allocator with:
/// ```ignore
/// #[global_allocator]
/// static GLOBAL: cmpool::CmPool = cmpool::CmPool;
/// ```
pub struct CmPool;

unsafe impl GlobalAlloc for CmPool {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let size = layout.size();
        if size == 0 {
            return layout.align() as *mut u8;
        }

        stat_inc!(alloc_count);
        stat_add!(alloc_bytes, size as u64);

        let align = layout.align();
        if align <= 8 {
            // Class sizes are 8-aligned and spans are page-aligned, so the
            // class path satisfies any alignment up to 8.
            if size <= MAX_BYTES {
                return unsafe { alloc_small(size) };
            }
            return unsafe { alloc_page_direct(size) };
        }

        if align > PAGE_SIZE {
            // Page-direct spans are PAGE_SIZE-aligned; nothing stronger
            // is available.
            return ptr::null_mut();
        }

        // Over-aligned: bump to the next class whose size the alignment
        // divides. Band sizes are multiples of their band alignment, so
        // one exists below MAX_BYTES for every power of two up to the
        // page size. The walk starts at or above `align` and each step
        // advances by the band alignment, so it ends within one band
        // (tens of probes at worst, only on this cold path).
        let mut aligned = size_class::round_up(size.max(align));
        while aligned <= MAX_BYTES && aligned % align != 0 {
            aligned = size_class::round_up(aligned + 1);
        }
        if aligned <= MAX_BYTES {
            unsafe { alloc_small(aligned) }
        } else {
            unsafe { alloc_page_direct(size.max(align)) }
        }
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        // Route by span metadata, not layout: after an in-place realloc
        // shrink the caller's layout may undershoot the real class.
        concurrent_free(ptr);
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { self.alloc(layout) };
        if !ptr.is_null() && layout.size() > 0 {
            unsafe { ptr::write_bytes(ptr, 0, layout.size()) };
        }
        ptr
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if ptr.is_null() || layout.size() == 0 {
            let new_layout =
                unsafe { Layout::from_size_align_unchecked(new_size, layout.align()) };
            return unsafe { self.alloc(new_layout) };
        }

        if new_size == 0 {
            unsafe { self.dealloc(ptr, layout) };
            return layout.align() as *mut u8;
        }

        // The span knows the real usable size; the caller's layout may not
        // (see dealloc).
        let span = PAGE_MAP.get((ptr as usize) >> PAGE_SHIFT);
        let old_usable = if !span.is_null() {
            unsafe { (*span).obj_size }
        } else {
            layout.size()
        };

        // Shrink (or lateral move) stays in place.
        if new_size <= old_usable {
            return ptr;
        }

        let new_layout = unsafe { Layout::from_size_align_unchecked(new_size, layout.align()) };
        let new_ptr = unsafe { self.alloc(new_layout) };
        if !new_ptr.is_null() {
            unsafe {
                ptr::copy_nonoverlapping(ptr, new_ptr, old_usable.min(new_size));
                self.dealloc(ptr, layout);
            }
        }
        new_ptr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn test_alloc_free_round_trip() {
        let p = concurrent_alloc(24);
        assert!(!p.is_null());
        assert_eq!(p as usize % 8, 0);
        unsafe { p.write_bytes(0x5A, 24) };
        concurrent_free(p);
    }

    #[test]
    fn test_small_allocs_are_distinct() {
        let mut ptrs = Vec::new();
        for _ in 0..200 {
            let p = concurrent_alloc(48);
            assert!(!p.is_null());
            ptrs.push(p);
        }
        for i in 0..ptrs.len() {
            for j in i + 1..ptrs.len() {
                assert_ne!(ptrs[i], ptrs[j]);
            }
        }
        for p in ptrs {
            concurrent_free(p);
        }
    }

    #[test]
    fn test_page_direct_round_trip() {
        let size = MAX_BYTES + 1;
        let p = concurrent_alloc(size);
        assert!(!p.is_null());
        assert_eq!(p as usize % PAGE_SIZE, 0);
        unsafe {
            *p = 1;
            *p.add(size - 1) = 2;
        }
        concurrent_free(p);
    }

    #[test]
    fn test_global_alloc_alignments() {
        let pool = CmPool;
        for align in [1usize, 2, 4, 8, 16, 64, 512, 4096] {
            for size in [1usize, 7, 24, 100, 1000, 5000] {
                if size < align && align > 8 {
                    continue;
                }
                let layout = Layout::from_size_align(size, align).unwrap();
                let p = unsafe { pool.alloc(layout) };
                assert!(!p.is_null(), "size={} align={}", size, align);
                assert_eq!(p as usize % align, 0, "size={} align={}", size, align);
                unsafe {
                    p.write_bytes(0xCD, size);
                    pool.dealloc(p, layout);
                }
            }
        }
    }

    #[test]
    fn test_global_alloc_realloc_grows_and_keeps_data() {
        let pool = CmPool;
        let layout = Layout::from_size_align(64, 8).unwrap();
        unsafe {
            let p = pool.alloc(layout);
            assert!(!p.is_null());
            for i in 0..64 {
                *p.add(i) = i as u8;
            }

            let grown = pool.realloc(p, layout, 4096);
            assert!(!grown.is_null());
            for i in 0..64 {
                assert_eq!(*grown.add(i), i as u8);
            }

            // Shrink stays in place.
            let grown_layout = Layout::from_size_align(4096, 8).unwrap();
            let shrunk = pool.realloc(grown, grown_layout, 16);
            assert_eq!(shrunk, grown);

            pool.dealloc(shrunk, grown_layout);
        }
    }

    #[test]
    fn test_alloc_zeroed() {
        let pool = CmPool;
        let layout = Layout::from_size_align(256, 8).unwrap();
        unsafe {
            let p = pool.alloc_zeroed(layout);
            assert!(!p.is_null());
            for i in 0..256 {
                assert_eq!(*p.add(i), 0);
            }
            pool.dealloc(p, layout);
        }
    }
}
