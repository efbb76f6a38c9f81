//! A fixed-size bootstrap allocator.
//!
//! One arena reserved up front serves small allocations (up to 64 KiB) before
//! a general-purpose allocator is available. Block metadata lives in a
//! boundary-tag bitmap beside the storage, free blocks are kept on
//! power-of-two segregated lists, and misuse or corruption aborts the process.

extern crate libc;

pub mod api;
pub mod config;
pub mod hardening;
pub mod heap;
pub mod init;
pub mod introspect;
pub mod platform;
pub mod sync;
pub mod util;

pub use api::{
    alloc, alloc_size, free, initialize, is_initialized, lock, owns, reinit_lock, statistics, unlock,
    zone_base,
};
pub use hardening::{ClientFault, Fault, IntegrityReport, InternalFault};
pub use heap::{Arena, ZoneStatistics};
pub use platform::{MmapPages, PageProvider};
pub use util::{MAX_ALLOC_SIZE, QUANTUM};
