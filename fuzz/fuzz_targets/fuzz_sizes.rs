#![no_main]

use earlymalloc::{Arena, MmapPages, MAX_ALLOC_SIZE};
use libfuzzer_sys::fuzz_target;
use std::sync::OnceLock;

// Fuzz target that exercises size boundaries.
// Interprets input as a series of u32 sizes, allocates each one in turn
// (keeping them all live), checks alignment, size and overlap, then frees
// them in input order, or reversed when the last byte is odd.

fn arena() -> &'static Arena {
    static ARENA: OnceLock<Arena> = OnceLock::new();
    ARENA.get_or_init(|| Arena::create(MmapPages::new(), 4 << 20).expect("arena reservation failed"))
}

fuzz_target!(|data: &[u8]| {
    let arena = arena();
    let mut live: Vec<(usize, usize)> = Vec::new();

    for chunk in data.chunks_exact(4) {
        let raw_size = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as usize;
        // Keep most requests near the limit so both sides of it are hit.
        let size = raw_size % (MAX_ALLOC_SIZE + 4096);

        let rounded = size.max(1).div_ceil(16) * 16;
        let Some(p) = arena.alloc(size) else {
            assert!(size > MAX_ALLOC_SIZE || arena.frontier() * 16 + rounded > 4 << 20);
            continue;
        };
        assert!(size <= MAX_ALLOC_SIZE);

        let start = p.as_ptr() as usize;
        let len = arena.alloc_size(p.as_ptr());
        assert_eq!(start % 16, 0);
        assert_eq!(len, rounded);
        for &(other, other_len) in &live {
            assert!(start + len <= other || other + other_len <= start);
        }
        // Touch both ends.
        unsafe {
            p.as_ptr().write(0xBB);
            p.as_ptr().add(len - 1).write(0xBB);
        }
        live.push((start, len));
    }

    if data.last().is_some_and(|b| b & 1 == 1) {
        live.reverse();
    }
    for (start, _) in live {
        unsafe { arena.free(start as *mut u8) };
    }
    let report = arena.check_integrity();
    assert!(report.is_ok(), "{:?}", report);
    assert_eq!(arena.frontier(), 0);
});
