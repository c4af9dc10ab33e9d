//! Page ID -> span map, a 3-level radix tree.
//!
//! With 48-bit virtual addresses and a 13-bit page shift there are 35 bits
//! of page ID, split root 12 / mid 12 / leaf 11. The root lives in the
//! static; mid and leaf nodes are allocated lazily from the OS.
//!
//! Lookups are lock-free `Acquire` loads, so the free path can resolve a
//! span while holding a central-cache bucket lock without ever touching the
//! page lock. All stores happen under the page lock.

use crate::config::PAGE_SIZE;
use crate::platform;
use crate::span::Span;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

const ROOT_BITS: usize = 12;
const MID_BITS: usize = 12;
const LEAF_BITS: usize = 11;

const ROOT_LEN: usize = 1 << ROOT_BITS;
const MID_LEN: usize = 1 << MID_BITS;
const LEAF_LEN: usize = 1 << LEAF_BITS;

const MID_SHIFT: usize = LEAF_BITS;
const ROOT_SHIFT: usize = LEAF_BITS + MID_BITS;

const MID_MASK: usize = MID_LEN - 1;
const LEAF_MASK: usize = LEAF_LEN - 1;

#[repr(C)]
struct MidNode {
    children: [AtomicPtr<LeafNode>; MID_LEN],
}

#[repr(C)]
struct LeafNode {
    spans: [AtomicPtr<Span>; LEAF_LEN],
}

/// Radix map from page ID to owning span.
pub struct PageMap {
    root: [AtomicPtr<MidNode>; ROOT_LEN],
}

// AtomicPtr arrays; only safe operations are exposed.
unsafe impl Send for PageMap {}
unsafe impl Sync for PageMap {}

impl PageMap {
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            root: [const { AtomicPtr::new(ptr::null_mut()) }; ROOT_LEN],
        }
    }

    /// Look up the span owning `page_id`. Lock-free; null if unmapped.
    #[inline]
    pub fn get(&self, page_id: usize) -> *mut Span {
        let root_idx = page_id >> ROOT_SHIFT;
        let mid_idx = (page_id >> MID_SHIFT) & MID_MASK;
        let leaf_idx = page_id & LEAF_MASK;

        if root_idx >= ROOT_LEN {
            return ptr::null_mut();
        }

        let mid = self.root[root_idx].load(Ordering::Acquire);
        if mid.is_null() {
            return ptr::null_mut();
        }

        let leaf = unsafe { (*mid).children[mid_idx].load(Ordering::Acquire) };
        if leaf.is_null() {
            return ptr::null_mut();
        }

        unsafe { (*leaf).spans[leaf_idx].load(Ordering::Acquire) }
    }

    /// Point `page_id` at `span`, materializing interior nodes as needed.
    ///
    /// # Safety
    /// Must be called under the page lock; `span` must be valid or null.
    pub unsafe fn set(&self, page_id: usize, span: *mut Span) {
        let root_idx = page_id >> ROOT_SHIFT;
        let mid_idx = (page_id >> MID_SHIFT) & MID_MASK;
        let leaf_idx = page_id & LEAF_MASK;

        assert!(root_idx < ROOT_LEN, "page_id out of range for page map");

        let mut mid = self.root[root_idx].load(Ordering::Acquire);
        if mid.is_null() {
            mid = Self::alloc_node::<MidNode>();
            assert!(!mid.is_null(), "failed to allocate page map node");
            // Release so lock-free readers see a fully zeroed node.
            self.root[root_idx].store(mid, Ordering::Release);
        }

        let mut leaf = unsafe { (*mid).children[mid_idx].load(Ordering::Acquire) };
        if leaf.is_null() {
            leaf = Self::alloc_node::<LeafNode>();
            assert!(!leaf.is_null(), "failed to allocate page map node");
            unsafe { (*mid).children[mid_idx].store(leaf, Ordering::Release) };
        }

        unsafe { (*leaf).spans[leaf_idx].store(span, Ordering::Release) };
    }

    /// Map every page in `span`'s range to it. Used when a span leaves the
    /// page cache, so any interior object address resolves on free.
    ///
    /// # Safety
    /// Must be called under the page lock.
    pub unsafe fn map_range(&self, span: *mut Span) {
        let start = unsafe { (*span).page_id };
        let count = unsafe { (*span).num_pages };
        for page_id in start..start + count {
            unsafe { self.set(page_id, span) };
        }
    }

    /// Map only a span's first and last pages. Enough for an idle span:
    /// coalescing probes just the pages adjacent to a neighbour's range.
    ///
    /// # Safety
    /// Must be called under the page lock.
    pub unsafe fn map_edges(&self, span: *mut Span) {
        let start = unsafe { (*span).page_id };
        let count = unsafe { (*span).num_pages };
        unsafe { self.set(start, span) };
        if count > 1 {
            unsafe { self.set(start + count - 1, span) };
        }
    }

    /// OS-backed node allocation: zeroed memory is a valid all-null node.
    fn alloc_node<N>() -> *mut N {
        let size = core::mem::size_of::<N>();
        let pages = size.div_ceil(PAGE_SIZE);
        let ptr = unsafe { platform::alloc_pages(pages) };
        ptr.cast::<N>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{alloc_span, dealloc_span};

    #[test]
    fn test_get_unmapped() {
        let map = PageMap::new();
        assert!(map.get(0).is_null());
        assert!(map.get(1000).is_null());
        assert!(map.get(usize::MAX).is_null());
    }

    #[test]
    fn test_set_get() {
        let map = PageMap::new();
        let s = alloc_span();
        unsafe {
            map.set(42, s);
            assert_eq!(map.get(42), s);
            assert!(map.get(41).is_null());
            assert!(map.get(43).is_null());

            map.set(42, core::ptr::null_mut());
            assert!(map.get(42).is_null());
            dealloc_span(s);
        }
    }

    #[test]
    fn test_map_range() {
        let map = PageMap::new();
        let s = alloc_span();
        unsafe {
            (*s).page_id = 100;
            (*s).num_pages = 5;
            map.map_range(s);

            for page in 100..105 {
                assert_eq!(map.get(page), s);
            }
            assert!(map.get(99).is_null());
            assert!(map.get(105).is_null());
            dealloc_span(s);
        }
    }

    #[test]
    fn test_map_edges() {
        let map = PageMap::new();
        let s = alloc_span();
        unsafe {
            (*s).page_id = 200;
            (*s).num_pages = 8;
            map.map_edges(s);

            assert_eq!(map.get(200), s);
            assert_eq!(map.get(207), s);
            assert!(map.get(203).is_null());
            dealloc_span(s);
        }
    }

    #[test]
    fn test_high_page_id() {
        let map = PageMap::new();
        let s = alloc_span();
        unsafe {
            // Exercises all three levels.
            let page_id = (1 << 30) + (1 << 15) + 42;
            map.set(page_id, s);
            assert_eq!(map.get(page_id), s);
            assert!(map.get(page_id - 1).is_null());
            assert!(map.get(page_id + 1).is_null());
            dealloc_span(s);
        }
    }
}
