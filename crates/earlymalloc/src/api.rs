//! Process-wide entry points over the singleton arena.
//!
//! `alloc` creates the arena on first use; the queries never do and report
//! "not ours" until it exists.

use crate::hardening::{self, ClientFault};
use crate::heap::ZoneStatistics;
use crate::init;
use core::ptr::NonNull;

pub use crate::init::{initialize, is_initialized};

/// Allocate `size` bytes of zeroed, 16-byte aligned memory.
///
/// Returns `None` when the request exceeds `MAX_ALLOC_SIZE` or the arena is
/// exhausted, so the caller can fall back to another allocator.
#[inline]
pub fn alloc(size: usize) -> Option<NonNull<u8>> {
    init::get_or_initialize().alloc(size)
}

/// Free an allocation returned by [`alloc`]. Null is ignored.
///
/// Double frees, foreign or misaligned pointers, and detected metadata
/// corruption terminate the process.
///
/// # Safety
/// `ptr` must not be used after this call.
#[inline]
pub unsafe fn free(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    match init::get() {
        Some(arena) => arena.free(ptr),
        None => hardening::fatal(ClientFault::NotOwned.into(), ptr as usize),
    }
}

/// Usable size of the allocation at `ptr` in bytes, or 0 if it is not one of ours.
#[inline]
pub fn alloc_size(ptr: *const u8) -> usize {
    init::get().map_or(0, |arena| arena.alloc_size(ptr))
}

/// Whether `ptr` is a quantum-aligned address inside the arena's block storage.
#[inline]
pub fn owns(ptr: *const u8) -> bool {
    init::get().is_some_and(|arena| arena.owns(ptr))
}

/// Base address of the arena, for registries and introspection.
pub fn zone_base() -> Option<NonNull<u8>> {
    init::get().map(|arena| arena.zone_base())
}

/// Take the arena lock. Does nothing before initialization.
pub fn lock() {
    if let Some(arena) = init::get() {
        arena.lock();
    }
}

/// Release the arena lock.
///
/// # Safety
/// The caller must hold the lock through [`lock`].
pub unsafe fn unlock() {
    if let Some(arena) = init::get() {
        arena.unlock();
    }
}

/// Reset the arena lock in a forked child.
///
/// # Safety
/// Only sound while the calling thread is the only thread in the process.
pub unsafe fn reinit_lock() {
    if let Some(arena) = init::get() {
        arena.reinit_lock();
    }
}

pub fn statistics() -> ZoneStatistics {
    init::get().map_or_else(ZoneStatistics::default, |arena| arena.statistics())
}
