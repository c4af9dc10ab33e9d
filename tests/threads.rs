//! Cross-thread alloc/free over the raw API.
//!
//! Objects allocated on one thread are verified and freed on another, so
//! the central cache sees objects coming home to spans their freeing
//! thread never fetched from.

use cmpool::{concurrent_alloc, concurrent_free};
use std::sync::mpsc;

fn fill(ptr: *mut u8, size: usize, seed: usize) {
    for i in 0..size {
        unsafe {
            *ptr.add(i) = ((seed.wrapping_add(i).wrapping_mul(0x9E37_79B9)) & 0xFF) as u8;
        }
    }
}

fn check(ptr: *mut u8, size: usize, seed: usize) -> bool {
    for i in 0..size {
        let expected = ((seed.wrapping_add(i).wrapping_mul(0x9E37_79B9)) & 0xFF) as u8;
        if unsafe { *ptr.add(i) } != expected {
            return false;
        }
    }
    true
}

#[test]
fn producer_consumer_cross_thread_free() {
    let num_producers = 4;
    let items_per_producer = 500;
    let size = 64;

    let (tx, rx) = mpsc::channel::<Vec<(usize, usize)>>();

    let producers: Vec<_> = (0..num_producers)
        .map(|t| {
            let tx = tx.clone();
            std::thread::spawn(move || {
                let mut batch = Vec::new();
                for i in 0..items_per_producer {
                    let p = concurrent_alloc(size);
                    assert!(!p.is_null());
                    let seed = t * items_per_producer + i;
                    fill(p, size, seed);
                    batch.push((p as usize, seed));
                    if batch.len() == 50 {
                        tx.send(std::mem::take(&mut batch)).unwrap();
                    }
                }
                if !batch.is_empty() {
                    tx.send(batch).unwrap();
                }
            })
        })
        .collect();
    drop(tx);

    // Consumer: verify the fill pattern survived the handoff, then free on
    // this thread.
    let mut freed = 0;
    while let Ok(batch) = rx.recv() {
        for (addr, seed) in batch {
            let p = addr as *mut u8;
            assert!(check(p, size, seed), "pattern lost crossing threads");
            concurrent_free(p);
            freed += 1;
        }
    }
    for h in producers {
        h.join().unwrap();
    }
    assert_eq!(freed, num_producers * items_per_producer);
}

#[test]
fn many_threads_churn_mixed_sizes() {
    let num_threads = 8;
    let rounds = 200;

    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            std::thread::spawn(move || {
                let sizes = [8usize, 24, 64, 200, 1024, 4096, 20_000];
                let mut live: Vec<(*mut u8, usize, usize)> = Vec::new();
                for round in 0..rounds {
                    for (k, &size) in sizes.iter().enumerate() {
                        let p = concurrent_alloc(size);
                        assert!(!p.is_null());
                        let seed = t * 1_000_000 + round * 100 + k;
                        fill(p, size, seed);
                        live.push((p, size, seed));
                    }
                    // Free roughly half, oldest first, verifying contents.
                    while live.len() > sizes.len() * 2 {
                        let (p, size, seed) = live.remove(0);
                        assert!(check(p, size, seed), "corruption in thread {}", t);
                        concurrent_free(p);
                    }
                }
                for (p, size, seed) in live {
                    assert!(check(p, size, seed));
                    concurrent_free(p);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn alloc_on_exiting_threads_is_reclaimed() {
    // Threads that allocate, free, and die in quick succession: their
    // caches flush on exit, so nothing is stranded and later threads can
    // reuse the memory.
    for _ in 0..20 {
        std::thread::spawn(|| {
            let mut ptrs = Vec::new();
            for _ in 0..100 {
                let p = concurrent_alloc(96);
                assert!(!p.is_null());
                ptrs.push(p);
            }
            for p in ptrs {
                concurrent_free(p);
            }
        })
        .join()
        .unwrap();
    }
}
