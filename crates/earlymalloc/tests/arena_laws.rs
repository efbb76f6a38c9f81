//! Allocation laws checked against private arenas.

use earlymalloc::{Arena, MmapPages, MAX_ALLOC_SIZE, QUANTUM};
use std::ptr::NonNull;

fn arena(size: usize) -> Arena {
    Arena::create(MmapPages::new(), size).expect("arena reservation failed")
}

fn addr(p: NonNull<u8>) -> usize {
    p.as_ptr() as usize
}

fn round_up(n: usize) -> usize {
    n.max(1).div_ceil(QUANTUM) * QUANTUM
}

/// xorshift64*, enough to shuffle test sequences reproducibly.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 >> 12;
        self.0 ^= self.0 << 25;
        self.0 ^= self.0 >> 27;
        self.0.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }
}

#[test]
fn alignment_and_size_laws() {
    let arena = arena(4 << 20);
    let sizes = [0, 1, 15, 16, 17, 31, 32, 100, 1000, 1008, 1009, 4096, 60_000, MAX_ALLOC_SIZE];
    for &size in &sizes {
        let p = arena.alloc(size).unwrap();
        assert_eq!(addr(p) % QUANTUM, 0, "size {}", size);
        assert_eq!(arena.alloc_size(p.as_ptr()), round_up(size), "size {}", size);
    }
    assert!(arena.check_integrity().is_ok());
}

#[test]
fn live_allocations_never_overlap() {
    let arena = arena(1 << 20);
    let mut rng = Rng(0x9E37_79B9_7F4A_7C15);
    let mut live: Vec<(usize, usize)> = Vec::new();

    for _ in 0..5_000 {
        if live.is_empty() || rng.below(3) != 0 {
            let size = match rng.below(10) {
                0 => rng.below(8192),
                _ => rng.below(256),
            };
            if let Some(p) = arena.alloc(size) {
                let start = addr(p);
                let len = arena.alloc_size(p.as_ptr());
                for &(other, other_len) in &live {
                    assert!(
                        start + len <= other || other + other_len <= start,
                        "[{:#x}, +{}) overlaps [{:#x}, +{})",
                        start,
                        len,
                        other,
                        other_len
                    );
                }
                live.push((start, len));
            }
        } else {
            let (start, _) = live.swap_remove(rng.below(live.len()));
            unsafe { arena.free(start as *mut u8) };
        }
    }

    let report = arena.check_integrity();
    assert!(report.is_ok(), "{:?}", report);
    assert_eq!(report.allocated_blocks, live.len());
}

#[test]
fn alloc_then_free_restores_frontier() {
    let arena = arena(1 << 20);
    let _keep = arena.alloc(48).unwrap();
    for size in [0, 16, 17, 512, 4095, MAX_ALLOC_SIZE] {
        let before = arena.frontier();
        let p = arena.alloc(size).unwrap();
        assert!(arena.frontier() > before);
        unsafe { arena.free(p.as_ptr()) };
        assert_eq!(arena.frontier(), before, "size {}", size);
    }
}

#[test]
fn adjacent_frees_coalesce_in_either_order() {
    for lower_first in [true, false] {
        let arena = arena(1 << 20);
        let x = arena.alloc(64).unwrap();
        let y = arena.alloc(64).unwrap();
        let _guard = arena.alloc(16).unwrap();
        let frontier = arena.frontier();
        unsafe {
            if lower_first {
                arena.free(x.as_ptr());
                arena.free(y.as_ptr());
            } else {
                arena.free(y.as_ptr());
                arena.free(x.as_ptr());
            }
        }
        let merged = arena.alloc(128).unwrap();
        assert_eq!(merged, x);
        assert_eq!(arena.frontier(), frontier);
        assert!(arena.check_integrity().is_ok());
    }
}

#[test]
fn adjacent_frees_at_frontier_coalesce_into_retraction() {
    for lower_first in [true, false] {
        let arena = arena(1 << 20);
        let _keep = arena.alloc(16).unwrap();
        let x = arena.alloc(48).unwrap();
        let y = arena.alloc(32).unwrap();
        let frontier = arena.frontier();
        unsafe {
            if lower_first {
                arena.free(x.as_ptr());
                arena.free(y.as_ptr());
            } else {
                arena.free(y.as_ptr());
                arena.free(x.as_ptr());
            }
        }
        let merged = arena.alloc(80).unwrap();
        assert_eq!(merged, x);
        assert_eq!(arena.frontier(), frontier);
    }
}

#[test]
fn freed_neighbors_serve_a_smaller_request_in_place() {
    let arena = arena(1 << 20);
    let first = arena.alloc(10).unwrap();
    let second = arena.alloc(10).unwrap();
    let third = arena.alloc(128).unwrap();
    let _guard = arena.alloc(16).unwrap();
    assert_eq!(addr(second), addr(first) + 16);
    assert_eq!(addr(third), addr(second) + 16);
    assert_eq!(arena.alloc_size(third.as_ptr()), 128);

    unsafe {
        arena.free(second.as_ptr());
        arena.free(third.as_ptr());
    }
    let report = arena.check_integrity();
    assert_eq!(report.free_blocks, 1);

    let frontier = arena.frontier();
    let p = arena.alloc(64).unwrap();
    assert_eq!(p, second);
    assert_eq!(arena.frontier(), frontier);
    assert!(arena.check_integrity().is_ok());
}

#[test]
fn size_query_on_unallocated_addresses() {
    let arena = arena(1 << 20);
    let p = arena.alloc(256).unwrap();
    let _guard = arena.alloc(16).unwrap();
    let storage_end = addr(p) + arena.layout().storage_size();

    // Inside a live block, past the frontier, and outside storage.
    assert_eq!(arena.alloc_size(unsafe { p.as_ptr().add(32) }), 0);
    assert_eq!(arena.alloc_size((storage_end - QUANTUM) as *const u8), 0);
    assert_eq!(arena.alloc_size(storage_end as *const u8), 0);
    assert_eq!(arena.alloc_size(arena.zone_base().as_ptr()), 0);

    unsafe { arena.free(p.as_ptr()) };
    assert_eq!(arena.alloc_size(p.as_ptr()), 0);
}

#[test]
fn requests_above_limit_fall_through() {
    let arena = arena(1 << 20);
    assert!(arena.alloc(MAX_ALLOC_SIZE + 1).is_none());
    assert!(arena.alloc(usize::MAX).is_none());
    assert_eq!(arena.frontier(), 0);
}

#[test]
fn exhausted_arena_recovers_after_frees() {
    let arena = arena(64 * 1024);
    let mut blocks = Vec::new();
    while let Some(p) = arena.alloc(1024) {
        blocks.push(p);
    }
    assert_eq!(blocks.len(), 64);
    assert!(arena.alloc(16).is_none());

    // Free every other block; the holes serve same-sized requests again.
    for p in blocks.iter().step_by(2) {
        unsafe { arena.free(p.as_ptr()) };
    }
    assert!(arena.check_integrity().is_ok());
    let again = arena.alloc(1024).unwrap();
    assert!(blocks.contains(&again));
}

#[test]
fn large_blocks_split_and_merge() {
    let arena = arena(1 << 20);
    let big = arena.alloc(MAX_ALLOC_SIZE).unwrap();
    let _guard = arena.alloc(16).unwrap();
    unsafe { arena.free(big.as_ptr()) };

    let pieces: Vec<_> = (0..4).map(|_| arena.alloc(4096).unwrap()).collect();
    for (i, p) in pieces.iter().enumerate() {
        assert_eq!(addr(*p), addr(big) + i * 4096);
    }
    assert!(arena.check_integrity().is_ok());

    for p in pieces.iter().rev() {
        unsafe { arena.free(p.as_ptr()) };
    }
    let report = arena.check_integrity();
    assert!(report.is_ok(), "{:?}", report);
    assert_eq!(report.free_blocks, 1);
    assert_eq!(arena.alloc(MAX_ALLOC_SIZE).unwrap(), big);
}
