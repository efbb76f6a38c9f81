//! The process-wide arena.
//!
//! Created once by the first `initialize()` (or the first `api::alloc`), then
//! lives until the process exits. Creation is the only writer; everything
//! after goes through the arena's own lock.

use crate::config;
use crate::hardening::{self, fork, InternalFault};
use crate::heap::Arena;
use crate::platform::MmapPages;
use crate::util;
use std::sync::OnceLock;

static ARENA: OnceLock<Arena> = OnceLock::new();

/// Create the process-wide arena if it does not exist yet.
///
/// Reads the configuration, reserves the arena and registers the fork
/// handlers. Failing to reserve is fatal.
pub fn initialize() -> &'static Arena {
    let arena = ARENA.get_or_init(|| {
        // SAFETY: runs once, before any arena exists.
        unsafe {
            util::init_page_size();
            config::read_config();
        }
        match Arena::create(MmapPages::new(), config::arena_size()) {
            Some(arena) => arena,
            None => hardening::fatal(InternalFault::ReserveFailed.into(), 0),
        }
    });
    if config::register_atfork() && !fork::is_registered() {
        fork::register_atfork();
    }
    arena
}

/// The arena, if it has been created.
#[inline(always)]
pub fn get() -> Option<&'static Arena> {
    ARENA.get()
}

/// The arena, creating it on first use.
#[inline(always)]
pub fn get_or_initialize() -> &'static Arena {
    match ARENA.get() {
        Some(arena) => arena,
        None => initialize(),
    }
}

#[inline(always)]
pub fn is_initialized() -> bool {
    ARENA.get().is_some()
}
