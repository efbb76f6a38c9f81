use super::{IntrospectError, MemoryReader};
use crate::heap::bitmap::{Block, BlockMap, Walk};
use crate::heap::layout::{ArenaHeader, ArenaLayout, ZoneStatistics, ARENA_MAGIC, LAYOUT_VERSION};
use crate::util::QUANTUM_SHIFT;
use core::mem::{size_of, MaybeUninit};
use core::sync::atomic::AtomicU64;

/// A copy of an arena's header and bitmap, decoded without its lock.
pub struct ZoneSnapshot {
    zone: usize,
    layout: ArenaLayout,
    frontier: usize,
    statistics: ZoneStatistics,
    words: Vec<AtomicU64>,
}

impl ZoneSnapshot {
    /// Copy the metadata of the arena whose header is at `zone`.
    pub fn capture<R: MemoryReader + ?Sized>(reader: &R, zone: usize) -> Result<Self, IntrospectError> {
        let mut header = MaybeUninit::<ArenaHeader>::zeroed();
        // SAFETY: the header is plain integers, so every byte pattern is valid.
        let header = unsafe {
            let bytes = core::slice::from_raw_parts_mut(
                header.as_mut_ptr().cast::<u8>(),
                size_of::<ArenaHeader>(),
            );
            reader.read(zone, bytes)?;
            header.assume_init()
        };
        if header.magic != ARENA_MAGIC {
            return Err(IntrospectError::BadMagic(zone));
        }
        if header.version != LAYOUT_VERSION {
            return Err(IntrospectError::BadVersion(header.version));
        }
        let layout = header
            .layout()
            .ok_or(IntrospectError::Corrupt("inconsistent layout"))?;
        let frontier = header.frontier();
        if frontier > layout.capacity {
            return Err(IntrospectError::Corrupt("frontier beyond capacity"));
        }

        let mut raw = Vec::new();
        raw.try_reserve_exact(layout.bitmap_words * 8)
            .map_err(|_| IntrospectError::Corrupt("bitmap too large to copy"))?;
        raw.resize(layout.bitmap_words * 8, 0);
        reader.read(zone + layout.bitmap_offset, &mut raw)?;
        let words = raw
            .chunks_exact(8)
            .map(|chunk| {
                let mut word = [0u8; 8];
                word.copy_from_slice(chunk);
                AtomicU64::new(u64::from_ne_bytes(word))
            })
            .collect();

        Ok(ZoneSnapshot {
            zone,
            layout,
            frontier,
            statistics: header.statistics(),
            words,
        })
    }

    pub fn zone(&self) -> usize {
        self.zone
    }

    pub fn layout(&self) -> &ArenaLayout {
        &self.layout
    }

    /// Bump frontier in quanta at capture time.
    pub fn frontier(&self) -> usize {
        self.frontier
    }

    pub fn statistics(&self) -> ZoneStatistics {
        self.statistics
    }

    /// Address of the first byte of block storage in the target process.
    pub fn storage_address(&self) -> usize {
        self.zone + self.layout.storage_offset
    }

    /// Address of `block` in the target process.
    pub fn block_address(&self, block: &Block) -> usize {
        self.storage_address() + (block.index << QUANTUM_SHIFT)
    }

    /// Blocks below the frontier in address order.
    pub fn blocks(&self) -> Walk<'_> {
        BlockMap::new(&self.words, self.layout.capacity).walk(self.frontier)
    }
}
