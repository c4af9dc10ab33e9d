//! Span descriptors: metadata for contiguous runs of pages.

use crate::config::{PAGE_SHIFT, PAGE_SIZE};
use crate::free_list::FreeObject;
use crate::object_pool::ObjectPool;
use crate::sync::SpinMutex;
use core::ptr;

/// Metadata for a contiguous run of pages.
///
/// A span lives in exactly one place at a time: a page-cache bucket
/// (`in_use == false`), a central-cache bucket (`in_use == true`), or in
/// the hands of a page-direct caller. Descriptors come from a dedicated
/// [`ObjectPool`], never from the allocator being built.
#[repr(C)]
pub struct Span {
    /// First page ID (address >> PAGE_SHIFT).
    pub page_id: usize,
    /// Number of pages.
    pub num_pages: usize,
    /// Object size this span is sliced into while the central cache owns
    /// it, `n << PAGE_SHIFT` for page-direct spans, 0 while idle.
    pub obj_size: usize,
    /// Objects currently held outside the page cache (by thread caches or
    /// users). Zero iff every sliced object is back on `free_list`.
    pub use_count: usize,
    /// True from the moment a span leaves the page cache until it returns.
    /// Coalescing never touches a span with this set.
    pub in_use: bool,
    /// Head of the sliced-object free list.
    pub free_list: *mut FreeObject,
    /// Intrusive links within the owning `SpanList`.
    pub prev: *mut Span,
    pub next: *mut Span,
}

impl Span {
    /// Base address of the memory this span covers.
    #[inline]
    pub fn start_addr(&self) -> *mut u8 {
        (self.page_id << PAGE_SHIFT) as *mut u8
    }

    /// Total bytes covered.
    #[inline]
    pub fn byte_size(&self) -> usize {
        self.num_pages * PAGE_SIZE
    }

    /// One past the last page ID.
    #[inline]
    pub fn end_page(&self) -> usize {
        self.page_id + self.num_pages
    }
}

/// A doubly-linked list of spans, linked through the spans themselves.
pub struct SpanList {
    pub head: *mut Span,
    pub len: usize,
}

impl Default for SpanList {
    fn default() -> Self {
        Self::new()
    }
}

impl SpanList {
    pub const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            len: 0,
        }
    }

    /// Prepend a span.
    ///
    /// # Safety
    ///
    /// `span` must be a valid, non-null `Span` not currently on any list.
    pub unsafe fn push_front(&mut self, span: *mut Span) {
        unsafe {
            (*span).next = self.head;
            (*span).prev = ptr::null_mut();
            if !self.head.is_null() {
                (*self.head).prev = span;
            }
        }
        self.head = span;
        self.len += 1;
    }

    /// Unlink a span that is on this list.
    ///
    /// # Safety
    ///
    /// `span` must currently be linked into this list.
    pub unsafe fn remove(&mut self, span: *mut Span) {
        unsafe {
            let prev = (*span).prev;
            let next = (*span).next;
            if !prev.is_null() {
                (*prev).next = next;
            } else {
                self.head = next;
            }
            if !next.is_null() {
                (*next).prev = prev;
            }
            (*span).prev = ptr::null_mut();
            (*span).next = ptr::null_mut();
        }
        self.len -= 1;
    }

    /// Unlink and return the first span, or null if empty.
    ///
    /// # Safety
    ///
    /// The list's links must be intact.
    pub unsafe fn pop_front(&mut self) -> *mut Span {
        let span = self.head;
        if !span.is_null() {
            unsafe { self.remove(span) };
        }
        span
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }
}

/// Process-wide descriptor pool.
static SPAN_POOL: SpinMutex<ObjectPool<Span>> = SpinMutex::new(ObjectPool::new());

/// Allocate a zeroed span descriptor. Returns null if the OS refuses the
/// pool a slab.
pub fn alloc_span() -> *mut Span {
    let span = SPAN_POOL.lock().alloc();
    if !span.is_null() {
        // All-zero is a valid idle Span: null links, not in use.
        unsafe { ptr::write_bytes(span as *mut u8, 0, core::mem::size_of::<Span>()) };
    }
    span
}

/// Return a descriptor for reuse.
///
/// # Safety
///
/// `span` must have come from [`alloc_span`] and must not be on any list.
pub unsafe fn dealloc_span(span: *mut Span) {
    unsafe { SPAN_POOL.lock().dealloc(span) };
}
