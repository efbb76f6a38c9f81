#![no_main]

use earlymalloc::{Arena, MmapPages};
use libfuzzer_sys::fuzz_target;
use std::sync::OnceLock;

/// Fuzz target that interprets a byte slice as a sequence of arena operations.
///
/// Each operation is encoded as:
///   byte 0: opcode (even = alloc into slot, odd = free slot)
///   byte 1-2: size (little-endian u16, so up to the 64 KiB limit)
///   byte 3: slot index (which tracked pointer to operate on)
///
/// We track up to 64 live pointers. After every input the arena must be
/// empty again with its frontier back at zero.
const MAX_SLOTS: usize = 64;

fn arena() -> &'static Arena {
    static ARENA: OnceLock<Arena> = OnceLock::new();
    ARENA.get_or_init(|| Arena::create(MmapPages::new(), 1 << 20).expect("arena reservation failed"))
}

fuzz_target!(|data: &[u8]| {
    let arena = arena();
    let mut slots: [Option<(*mut u8, usize, u8)>; MAX_SLOTS] = [None; MAX_SLOTS];

    let mut i = 0;
    while i + 4 <= data.len() {
        let opcode = data[i];
        let size = u16::from_le_bytes([data[i + 1], data[i + 2]]) as usize;
        let slot = (data[i + 3] as usize) % MAX_SLOTS;
        i += 4;

        if let Some((ptr, len, fill)) = slots[slot].take() {
            let bytes = unsafe { std::slice::from_raw_parts(ptr, len) };
            assert!(bytes.iter().all(|&b| b == fill), "allocation was overwritten");
            unsafe { arena.free(ptr) };
        }
        if opcode & 1 == 1 {
            continue;
        }

        if let Some(p) = arena.alloc(size) {
            let len = arena.alloc_size(p.as_ptr());
            assert_eq!(p.as_ptr() as usize % 16, 0);
            assert_eq!(len, size.max(1).div_ceil(16) * 16);
            let bytes = unsafe { std::slice::from_raw_parts_mut(p.as_ptr(), len) };
            assert!(bytes.iter().all(|&b| b == 0), "allocation was not zero filled");
            bytes.fill(opcode | 1);
            slots[slot] = Some((p.as_ptr(), len, opcode | 1));
        }
    }

    let report = arena.check_integrity();
    assert!(report.is_ok(), "{:?}", report);

    for (ptr, _, _) in slots.iter().flatten() {
        unsafe { arena.free(*ptr) };
    }
    let report = arena.check_integrity();
    assert!(report.is_ok(), "{:?}", report);
    assert_eq!(report.total_blocks, 0);
    assert_eq!(arena.frontier(), 0);
});
