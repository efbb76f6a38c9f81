//! Read-only view of an arena for heap inspectors and leak checkers.
//!
//! Everything here works from a [`ZoneSnapshot`] taken through a
//! [`MemoryReader`], never touching the arena lock, so it can inspect this
//! process or a stopped foreign one the same way.

mod reader;
mod snapshot;

#[cfg(target_os = "linux")]
pub use reader::ProcessReader;
pub use reader::{LocalReader, MemoryReader};
pub use snapshot::ZoneSnapshot;

pub use crate::heap::ZoneStatistics;

use crate::heap::bitmap::BlockState;
use crate::util::QUANTUM_SHIFT;
use core::fmt;
use core::ops::BitOr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IntrospectError {
    #[error("cannot read {len} bytes at {address:#x}")]
    Read { address: usize, len: usize },
    #[error("no early arena at {0:#x}")]
    BadMagic(usize),
    #[error("unsupported arena layout version {0}")]
    BadVersion(u32),
    #[error("arena metadata is corrupt: {0}")]
    Corrupt(&'static str),
    #[error("failed to write report")]
    Format(#[from] fmt::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeKind {
    /// Header and bitmap.
    Admin,
    /// All of block storage.
    Region,
    /// One allocated block.
    InUse,
}

/// Set of [`RangeKind`]s to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeKinds(u8);

impl RangeKinds {
    pub const ADMIN: RangeKinds = RangeKinds(1 << 0);
    pub const REGION: RangeKinds = RangeKinds(1 << 1);
    pub const IN_USE: RangeKinds = RangeKinds(1 << 2);
    pub const ALL: RangeKinds = RangeKinds(0b111);

    pub const fn contains(self, kind: RangeKind) -> bool {
        let bit = match kind {
            RangeKind::Admin => Self::ADMIN.0,
            RangeKind::Region => Self::REGION.0,
            RangeKind::InUse => Self::IN_USE.0,
        };
        self.0 & bit != 0
    }
}

impl BitOr for RangeKinds {
    type Output = RangeKinds;

    fn bitor(self, rhs: RangeKinds) -> RangeKinds {
        RangeKinds(self.0 | rhs.0)
    }
}

/// An address range in the target process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub kind: RangeKind,
    pub address: usize,
    pub size: usize,
}

/// Report the ranges of `kinds` for the arena at `zone`.
pub fn enumerate<R, F>(reader: &R, zone: usize, kinds: RangeKinds, recorder: F) -> Result<(), IntrospectError>
where
    R: MemoryReader + ?Sized,
    F: FnMut(Range),
{
    let snapshot = ZoneSnapshot::capture(reader, zone)?;
    enumerate_snapshot(&snapshot, kinds, recorder)
}

/// [`enumerate`] over an existing snapshot.
pub fn enumerate_snapshot<F>(snapshot: &ZoneSnapshot, kinds: RangeKinds, mut recorder: F) -> Result<(), IntrospectError>
where
    F: FnMut(Range),
{
    let layout = snapshot.layout();
    if kinds.contains(RangeKind::Admin) {
        recorder(Range {
            kind: RangeKind::Admin,
            address: snapshot.zone(),
            size: layout.admin_size(),
        });
    }
    if kinds.contains(RangeKind::Region) {
        recorder(Range {
            kind: RangeKind::Region,
            address: snapshot.storage_address(),
            size: layout.storage_size(),
        });
    }
    if kinds.contains(RangeKind::InUse) {
        for block in snapshot.blocks() {
            let block = block.map_err(|_| IntrospectError::Corrupt("block runs past the frontier"))?;
            if block.is_allocated() {
                recorder(Range {
                    kind: RangeKind::InUse,
                    address: snapshot.block_address(&block),
                    size: block.size << QUANTUM_SHIFT,
                });
            }
        }
    }
    Ok(())
}

/// Usage counters of the arena at `zone`.
pub fn statistics<R: MemoryReader + ?Sized>(reader: &R, zone: usize) -> Result<ZoneStatistics, IntrospectError> {
    Ok(ZoneSnapshot::capture(reader, zone)?.statistics())
}

/// Write a human-readable summary of the arena at `zone`; with `verbose`,
/// one line per block.
pub fn print<R, W>(reader: &R, zone: usize, out: &mut W, verbose: bool) -> Result<(), IntrospectError>
where
    R: MemoryReader + ?Sized,
    W: fmt::Write,
{
    let snapshot = ZoneSnapshot::capture(reader, zone)?;
    let layout = snapshot.layout();
    let stats = snapshot.statistics();
    writeln!(
        out,
        "early arena at {:#x}: storage {:#x}..{:#x}, frontier {:#x}",
        snapshot.zone(),
        snapshot.storage_address(),
        snapshot.storage_address() + layout.storage_size(),
        snapshot.storage_address() + (snapshot.frontier() << QUANTUM_SHIFT),
    )?;
    writeln!(
        out,
        "  blocks in use: {}, bytes in use: {}, high water: {}, reserved: {}",
        stats.blocks_in_use, stats.size_in_use, stats.max_size_in_use, stats.size_allocated,
    )?;
    if !verbose {
        return Ok(());
    }
    for block in snapshot.blocks() {
        match block {
            Ok(block) => {
                let state = match block.state {
                    BlockState::Allocated => "allocated",
                    BlockState::Free => "free",
                };
                writeln!(
                    out,
                    "  {:#x} {:>8} {}",
                    snapshot.block_address(&block),
                    block.size << QUANTUM_SHIFT,
                    state
                )?;
            }
            Err(bad) => {
                writeln!(
                    out,
                    "  malformed block at quantum {} (size {} quanta)",
                    bad.index, bad.size
                )?;
            }
        }
    }
    Ok(())
}
