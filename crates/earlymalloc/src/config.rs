use crate::util::{DEFAULT_ARENA_SIZE, MAX_ARENA_SIZE, MIN_ARENA_SIZE};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Cached config values (read once at init, never allocate).
static ARENA_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_ARENA_SIZE);
static REGISTER_ATFORK: AtomicBool = AtomicBool::new(true);

/// Read configuration from environment variables.
/// Must be called during init, before the arena is created.
///
/// # Safety
/// Calls libc::getenv, which must not race with setenv.
pub unsafe fn read_config() {
    if let Some(val) = getenv_usize(b"EARLYMALLOC_ARENA_SIZE\0") {
        ARENA_SIZE.store(clamp_arena_size(val), Ordering::Relaxed);
    }
    let key = b"EARLYMALLOC_NO_ATFORK\0".as_ptr() as *const libc::c_char;
    if !libc::getenv(key).is_null() {
        REGISTER_ATFORK.store(false, Ordering::Relaxed);
    }
}

/// Block-storage capacity in bytes.
pub fn arena_size() -> usize {
    ARENA_SIZE.load(Ordering::Relaxed)
}

pub fn register_atfork() -> bool {
    REGISTER_ATFORK.load(Ordering::Relaxed)
}

pub fn clamp_arena_size(size: usize) -> usize {
    size.clamp(MIN_ARENA_SIZE, MAX_ARENA_SIZE)
}

/// Parse an environment variable as a usize.
///
/// # Safety
/// Calls libc::getenv.
unsafe fn getenv_usize(key: &[u8]) -> Option<usize> {
    let val = libc::getenv(key.as_ptr() as *const libc::c_char);
    if val.is_null() {
        return None;
    }
    parse_usize(core::ffi::CStr::from_ptr(val).to_bytes())
}

/// Parse decimal digits without allocating. Empty or non-digit input is rejected.
fn parse_usize(bytes: &[u8]) -> Option<usize> {
    if bytes.is_empty() {
        return None;
    }
    let mut result: usize = 0;
    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return None;
        }
        result = result.checked_mul(10)?.checked_add((byte - b'0') as usize)?;
    }
    Some(result)
}
