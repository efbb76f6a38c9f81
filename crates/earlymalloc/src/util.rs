use core::sync::atomic::{AtomicUsize, Ordering};

/// Align `value` up to the next multiple of `align`.
/// `align` must be a power of two.
#[inline(always)]
pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Align `value` down to the previous multiple of `align`.
/// `align` must be a power of two.
#[inline(always)]
pub const fn align_down(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// Check if `value` is aligned to `align`.
#[inline(always)]
pub const fn is_aligned(value: usize, align: usize) -> bool {
    value & (align - 1) == 0
}

/// Allocation granularity. Every block is a whole number of quanta and every
/// returned pointer is quantum aligned.
pub const QUANTUM: usize = 16;

/// log2(QUANTUM).
pub const QUANTUM_SHIFT: u32 = QUANTUM.trailing_zeros();

/// Largest request the arena will serve. Bigger requests get `None` so the
/// caller can fall through to another allocator.
pub const MAX_ALLOC_SIZE: usize = 64 * 1024;

/// Block-storage capacity used when `EARLYMALLOC_ARENA_SIZE` is unset.
pub const DEFAULT_ARENA_SIZE: usize = 8 * 1024 * 1024;

/// Bounds for a configured arena size.
pub const MIN_ARENA_SIZE: usize = 64 * 1024;
#[cfg(target_pointer_width = "64")]
pub const MAX_ARENA_SIZE: usize = 4 * 1024 * 1024 * 1024;
#[cfg(not(target_pointer_width = "64"))]
pub const MAX_ARENA_SIZE: usize = 1024 * 1024 * 1024;

/// Number of whole quanta needed to hold `bytes`, with zero rounding up to one.
#[inline(always)]
pub const fn quanta_for_bytes(bytes: usize) -> usize {
    if bytes == 0 {
        1
    } else {
        (bytes + QUANTUM - 1) >> QUANTUM_SHIFT
    }
}

/// Runtime page size, from sysconf(_SC_PAGESIZE). Zero until first queried.
static PAGE_SIZE_CACHED: AtomicUsize = AtomicUsize::new(0);

/// Refresh the cached page size from the OS.
///
/// # Safety
/// Calls `sysconf`, which is fine from any thread but should run before the
/// first arena is laid out so the layout uses the real page size.
pub unsafe fn init_page_size() -> usize {
    let ps = libc::sysconf(libc::_SC_PAGESIZE);
    let ps = if ps > 0 { ps as usize } else { 4096 };
    PAGE_SIZE_CACHED.store(ps, Ordering::Release);
    ps
}

/// Get the system page size, querying the OS on first use.
#[inline(always)]
pub fn page_size() -> usize {
    match PAGE_SIZE_CACHED.load(Ordering::Relaxed) {
        // SAFETY: sysconf has no preconditions.
        0 => unsafe { init_page_size() },
        ps => ps,
    }
}
