//! Virtual memory on Unix via anonymous mmap.

use crate::config::PAGE_SIZE;
use core::ffi::c_void;
use core::ptr;

const PROT_READ: i32 = 0x1;
const PROT_WRITE: i32 = 0x2;
const MAP_PRIVATE: i32 = 0x02;
const MAP_ANONYMOUS: i32 = 0x20;
const MAP_FAILED: *mut c_void = !0usize as *mut c_void;

unsafe extern "C" {
    fn mmap(
        addr: *mut c_void,
        length: usize,
        prot: i32,
        flags: i32,
        fd: i32,
        offset: i64,
    ) -> *mut c_void;

    fn munmap(addr: *mut c_void, length: usize) -> i32;
}

/// Give a byte range back to the kernel, tolerating an empty one.
unsafe fn trim(addr: usize, len: usize) {
    if len > 0 {
        unsafe { munmap(addr as *mut c_void, len) };
    }
}

pub unsafe fn page_alloc(size: usize) -> *mut u8 {
    // The kernel aligns mappings to its own page (4 KiB), not to the
    // allocator page. Map one spare allocator page, pick the first
    // allocator-page boundary inside the mapping, and return the slack on
    // either side of the chosen window.
    let mapped = size + PAGE_SIZE;
    let raw = unsafe {
        mmap(
            ptr::null_mut(),
            mapped,
            PROT_READ | PROT_WRITE,
            MAP_PRIVATE | MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if raw == MAP_FAILED {
        return ptr::null_mut();
    }

    let base = raw as usize;
    let slack = base & (PAGE_SIZE - 1);
    let start = if slack == 0 {
        base
    } else {
        base + (PAGE_SIZE - slack)
    };

    unsafe {
        trim(base, start - base);
        trim(start + size, (base + mapped) - (start + size));
    }

    start as *mut u8
}

pub unsafe fn page_dealloc(ptr: *mut u8, size: usize) {
    unsafe { munmap(ptr as *mut c_void, size) };
}
