//! Fork safety: pthread_atfork handlers for the process-wide arena.
//!
//! After fork() the child has a single thread, but the arena lock may have
//! been held by a thread that no longer exists. The prepare handler takes the
//! lock so that the arena metadata is consistent at the instant of the fork;
//! the parent releases it and the child reinitializes it.

use core::sync::atomic::{AtomicBool, Ordering};

static REGISTERED: AtomicBool = AtomicBool::new(false);

unsafe extern "C" fn atfork_prepare() {
    if let Some(arena) = crate::init::get() {
        arena.lock();
    }
}

unsafe extern "C" fn atfork_parent() {
    if let Some(arena) = crate::init::get() {
        arena.unlock();
    }
}

/// # Safety
/// Called by the C runtime in the child after fork(), when only the forking
/// thread exists.
unsafe extern "C" fn atfork_child() {
    if let Some(arena) = crate::init::get() {
        arena.reinit_lock();
    }
}

/// Register the pthread_atfork handlers. Later calls are no-ops.
///
/// Must only be called once the process-wide arena exists, so that the
/// prepare and parent handlers always see the same arena.
pub fn register_atfork() {
    if REGISTERED.swap(true, Ordering::AcqRel) {
        return;
    }
    unsafe {
        libc::pthread_atfork(
            Some(atfork_prepare),
            Some(atfork_parent),
            Some(atfork_child),
        );
    }
}

pub fn is_registered() -> bool {
    REGISTERED.load(Ordering::Acquire)
}
