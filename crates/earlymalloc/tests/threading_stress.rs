//! Thread stress tests.
//!
//! Concurrent alloc/free through the process-wide arena and through a shared
//! private arena must not corrupt data or metadata, deadlock, or crash.

use earlymalloc::{Arena, MmapPages};
use std::ptr;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

/// Wrapper to allow sending `*mut u8` across thread boundaries.
#[derive(Clone, Copy)]
struct SendPtr(*mut u8);
unsafe impl Send for SendPtr {}
unsafe impl Sync for SendPtr {}

// ---------------------------------------------------------------------------
// N threads doing rapid alloc/free cycles
// ---------------------------------------------------------------------------

fn stress_alloc_free_n_threads(num_threads: usize) {
    const ITERATIONS: usize = 10_000;
    const ALLOC_SIZE: usize = 128;

    earlymalloc::initialize();
    let barrier = Arc::new(Barrier::new(num_threads));

    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..ITERATIONS {
                    let p = earlymalloc::alloc(ALLOC_SIZE).expect("alloc failed under contention");
                    unsafe {
                        ptr::write_bytes(p.as_ptr(), 0xCC, ALLOC_SIZE);
                        earlymalloc::free(p.as_ptr());
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().expect("thread panicked during alloc/free stress");
    }
}

#[test]
fn stress_alloc_free_4_threads() {
    stress_alloc_free_n_threads(4);
}

#[test]
fn stress_alloc_free_16_threads() {
    stress_alloc_free_n_threads(16);
}

// ---------------------------------------------------------------------------
// Cross-thread free: one thread allocates, another frees
// ---------------------------------------------------------------------------

#[test]
fn cross_thread_free() {
    const COUNT: usize = 1_000;
    const SIZE: usize = 64;

    earlymalloc::initialize();
    let barrier = Arc::new(Barrier::new(2));
    let shared: Arc<Mutex<Vec<SendPtr>>> = Arc::new(Mutex::new(Vec::with_capacity(COUNT)));

    let shared_producer = Arc::clone(&shared);
    let barrier_producer = Arc::clone(&barrier);
    let producer = thread::spawn(move || {
        barrier_producer.wait();
        for _ in 0..COUNT {
            let p = earlymalloc::alloc(SIZE).expect("alloc failed");
            unsafe { ptr::write_bytes(p.as_ptr(), 0xDD, SIZE) };
            shared_producer.lock().unwrap().push(SendPtr(p.as_ptr()));
        }
    });

    let shared_consumer = Arc::clone(&shared);
    let barrier_consumer = Arc::clone(&barrier);
    let consumer = thread::spawn(move || {
        barrier_consumer.wait();
        let mut freed = 0;
        while freed < COUNT {
            let batch: Vec<SendPtr> = shared_consumer.lock().unwrap().drain(..).collect();
            for sp in batch {
                assert_eq!(earlymalloc::alloc_size(sp.0), SIZE);
                unsafe { earlymalloc::free(sp.0) };
                freed += 1;
            }
            if freed < COUNT {
                thread::yield_now();
            }
        }
    });

    producer.join().expect("producer thread panicked");
    consumer.join().expect("consumer thread panicked");
}

// ---------------------------------------------------------------------------
// Data corruption check: thread-specific patterns over held allocations
// ---------------------------------------------------------------------------

#[test]
fn no_data_corruption_under_contention() {
    const NUM_THREADS: usize = 8;
    const ROUNDS: usize = 200;
    const LIVE_COUNT: usize = 16;
    const SIZES: [usize; 8] = [1, 16, 48, 128, 500, 1024, 4096, 9000];

    let arena = Arc::new(Arena::create(MmapPages::new(), 8 << 20).expect("arena reservation failed"));
    let barrier = Arc::new(Barrier::new(NUM_THREADS));

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|tid| {
            let arena = Arc::clone(&arena);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let pattern = (tid as u8).wrapping_add(1);
                for round in 0..ROUNDS {
                    let mut live = Vec::with_capacity(LIVE_COUNT);
                    for i in 0..LIVE_COUNT {
                        let size = SIZES[(tid + round + i) % SIZES.len()];
                        let p = arena.alloc(size).expect("private arena exhausted");
                        let bytes = unsafe { std::slice::from_raw_parts_mut(p.as_ptr(), size) };
                        assert!(bytes.iter().all(|&b| b == 0), "allocation not zero filled");
                        bytes.fill(pattern);
                        live.push((p, size));
                    }
                    for (p, size) in live {
                        let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), size) };
                        assert!(
                            bytes.iter().all(|&b| b == pattern),
                            "data corruption detected: thread {} found unexpected byte",
                            tid
                        );
                        unsafe { arena.free(p.as_ptr()) };
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().expect("thread panicked during corruption check");
    }

    let report = arena.check_integrity();
    assert!(report.is_ok(), "{:?}", report);
    assert_eq!(report.allocated_blocks, 0);
    assert_eq!(arena.frontier(), 0);
}

// ---------------------------------------------------------------------------
// Lock-free queries racing with mutation
// ---------------------------------------------------------------------------

#[test]
fn queries_race_with_mutation() {
    const ITERATIONS: usize = 20_000;

    let arena = Arc::new(Arena::create(MmapPages::new(), 1 << 20).expect("arena reservation failed"));
    let pinned = SendPtr(arena.alloc(256).unwrap().as_ptr());
    let barrier = Arc::new(Barrier::new(2));

    let writer = {
        let arena = Arc::clone(&arena);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            for i in 0..ITERATIONS {
                let p = arena.alloc(16 * (1 + i % 64)).unwrap();
                unsafe { arena.free(p.as_ptr()) };
            }
        })
    };

    let reader = {
        let arena = Arc::clone(&arena);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            let pinned = pinned;
            barrier.wait();
            for _ in 0..ITERATIONS {
                assert!(arena.owns(pinned.0));
                assert_eq!(arena.alloc_size(pinned.0), 256);
            }
        })
    };

    writer.join().expect("writer panicked");
    reader.join().expect("reader panicked");
    assert!(arena.check_integrity().is_ok());
}
