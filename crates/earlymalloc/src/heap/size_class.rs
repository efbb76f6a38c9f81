use crate::util::{quanta_for_bytes, MAX_ALLOC_SIZE, QUANTUM_SHIFT};

/// Power-of-two size classes over quantum counts.
///
/// Class `c` holds free blocks of `[2^c, 2^(c+1))` quanta, except the last
/// class, which holds every free block of `2^MAX_CLASS` quanta or more.
///
/// Classes: 1, 2-3, 4-7, 8-15, 16-31, 32-63, 64-127, 128-255, 256-511,
///          512-1023, 1024-2047, 2048-4095, 4096+
pub const NUM_SIZE_CLASSES: usize = 13;

pub const MAX_CLASS: usize = NUM_SIZE_CLASSES - 1;

/// Largest request in quanta.
pub const MAX_ALLOC_QUANTA: usize = MAX_ALLOC_SIZE >> QUANTUM_SHIFT;

const _: () = assert!(MAX_ALLOC_QUANTA == 1 << MAX_CLASS);

/// Class a free block of `quanta` quanta is filed under.
#[inline]
pub fn class_floor(quanta: usize) -> usize {
    debug_assert!(quanta > 0);
    (quanta.ilog2() as usize).min(MAX_CLASS)
}

/// Lowest class whose every member can hold `quanta` quanta.
/// Returns `None` above the largest request size.
#[inline]
pub fn class_ceil(quanta: usize) -> Option<usize> {
    debug_assert!(quanta > 0);
    let class = quanta.next_power_of_two().trailing_zeros() as usize;
    if class > MAX_CLASS {
        None
    } else {
        Some(class)
    }
}

/// Round a byte request to quanta. Returns `None` if it exceeds `MAX_ALLOC_SIZE`.
#[inline]
pub fn quanta_for(bytes: usize) -> Option<usize> {
    if bytes > MAX_ALLOC_SIZE {
        return None;
    }
    Some(quanta_for_bytes(bytes))
}
