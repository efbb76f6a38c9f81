//! Arena layout and the self-describing header.
//!
//! ```text
//! base
//! |  ArenaHeader  |  bitmap (16-byte aligned)  | pad |  block storage ...  |
//! ^ metadata, populated at creation               ^ page aligned, populated on demand
//! ```
//!
//! Everything an out-of-process reader needs to decode the arena is in the
//! header, so it is written once at creation and only its counters change.

use super::bitmap::BlockMap;
use super::free_list::{FreeLink, Link};
use super::size_class::NUM_SIZE_CLASSES;
use crate::util::{align_up, MAX_ARENA_SIZE, QUANTUM, QUANTUM_SHIFT};
use core::mem::{offset_of, size_of};
use core::sync::atomic::{AtomicU64, Ordering};

/// `"EARLYARN"` read as a little-endian u64.
pub const ARENA_MAGIC: u64 = u64::from_le_bytes(*b"EARLYARN");

pub const LAYOUT_VERSION: u32 = 1;

#[repr(C, align(16))]
#[derive(Debug)]
pub struct ArenaHeader {
    pub magic: u64,
    pub version: u32,
    pub quantum_shift: u32,
    /// Block storage capacity in quanta.
    pub capacity: u64,
    /// Byte offsets from the header base.
    pub bitmap_offset: u64,
    pub bitmap_words: u64,
    pub storage_offset: u64,
    /// Bytes reserved from the page provider, guard pages excluded.
    pub reserved_size: u64,
    /// Bump frontier in quanta.
    pub frontier: AtomicU64,
    /// Highest frontier ever reached, in quanta.
    pub high_water: AtomicU64,
    pub blocks_in_use: AtomicU64,
    pub bytes_in_use: AtomicU64,
    /// Sentinel head of each size-class list.
    pub heads: [FreeLink; NUM_SIZE_CLASSES],
}

const _: () = assert!(offset_of!(ArenaHeader, heads) % QUANTUM == 0);

impl ArenaHeader {
    /// Header for `layout` with zeroed counters and every list empty.
    pub fn new(layout: &ArenaLayout) -> Self {
        const EMPTY: FreeLink = FreeLink::new();
        let header = ArenaHeader {
            magic: ARENA_MAGIC,
            version: LAYOUT_VERSION,
            quantum_shift: QUANTUM_SHIFT,
            capacity: layout.capacity as u64,
            bitmap_offset: layout.bitmap_offset as u64,
            bitmap_words: layout.bitmap_words as u64,
            storage_offset: layout.storage_offset as u64,
            reserved_size: layout.reserved_size as u64,
            frontier: AtomicU64::new(0),
            high_water: AtomicU64::new(0),
            blocks_in_use: AtomicU64::new(0),
            bytes_in_use: AtomicU64::new(0),
            heads: [EMPTY; NUM_SIZE_CLASSES],
        };
        for (class, head) in header.heads.iter().enumerate() {
            let link = ArenaLayout::head_link(class);
            head.prev.store(link, Ordering::Relaxed);
            head.next.store(link, Ordering::Relaxed);
        }
        header
    }

    /// Recover the layout, rejecting headers that are not ours or do not add up.
    pub fn layout(&self) -> Option<ArenaLayout> {
        if self.magic != ARENA_MAGIC
            || self.version != LAYOUT_VERSION
            || self.quantum_shift != QUANTUM_SHIFT
        {
            return None;
        }
        let capacity = usize::try_from(self.capacity).ok()?;
        if capacity > MAX_ARENA_SIZE >> QUANTUM_SHIFT {
            return None;
        }
        let layout = ArenaLayout {
            capacity,
            bitmap_offset: usize::try_from(self.bitmap_offset).ok()?,
            bitmap_words: usize::try_from(self.bitmap_words).ok()?,
            storage_offset: usize::try_from(self.storage_offset).ok()?,
            reserved_size: usize::try_from(self.reserved_size).ok()?,
        };
        let bitmap_end = layout
            .bitmap_words
            .checked_mul(8)?
            .checked_add(layout.bitmap_offset)?;
        let storage_end = capacity
            .checked_mul(QUANTUM)?
            .checked_add(layout.storage_offset)?;
        let consistent = layout.bitmap_offset == ArenaLayout::BITMAP_OFFSET
            && layout.bitmap_words == BlockMap::words_for(capacity)
            && layout.storage_offset >= bitmap_end
            && layout.storage_offset % QUANTUM == 0
            && storage_end <= layout.reserved_size;
        consistent.then_some(layout)
    }

    #[inline]
    pub fn frontier(&self) -> usize {
        self.frontier.load(Ordering::Relaxed) as usize
    }

    #[inline]
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::Relaxed) as usize
    }

    pub fn statistics(&self) -> ZoneStatistics {
        ZoneStatistics {
            blocks_in_use: self.blocks_in_use.load(Ordering::Relaxed) as usize,
            size_in_use: self.bytes_in_use.load(Ordering::Relaxed) as usize,
            max_size_in_use: self.high_water() << QUANTUM_SHIFT,
            size_allocated: self.reserved_size as usize,
        }
    }
}

/// Arena usage counters, in bytes where they are sizes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ZoneStatistics {
    pub blocks_in_use: usize,
    pub size_in_use: usize,
    /// High-water mark of the bump frontier.
    pub max_size_in_use: usize,
    /// Reserved address space.
    pub size_allocated: usize,
}

/// What a free-list link refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTarget {
    Head(usize),
    Block(usize),
}

/// Offsets of each metadata region, derived from the storage capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaLayout {
    /// Block storage capacity in quanta.
    pub capacity: usize,
    pub bitmap_offset: usize,
    pub bitmap_words: usize,
    pub storage_offset: usize,
    pub reserved_size: usize,
}

impl ArenaLayout {
    pub const BITMAP_OFFSET: usize = align_up(size_of::<ArenaHeader>(), QUANTUM);

    const HEAD_LINK_BASE: usize = offset_of!(ArenaHeader, heads) / QUANTUM;

    /// Layout for `arena_size` bytes of block storage on `page_size` pages.
    pub fn new(arena_size: usize, page_size: usize) -> Self {
        let capacity = arena_size >> QUANTUM_SHIFT;
        let bitmap_words = BlockMap::words_for(capacity);
        let storage_offset = align_up(Self::BITMAP_OFFSET + bitmap_words * 8, page_size);
        let storage_size = align_up(capacity << QUANTUM_SHIFT, page_size);
        ArenaLayout {
            capacity,
            bitmap_offset: Self::BITMAP_OFFSET,
            bitmap_words,
            storage_offset,
            reserved_size: storage_offset + storage_size,
        }
    }

    /// Bytes of header and bitmap, page padding included.
    #[inline]
    pub fn metadata_size(&self) -> usize {
        self.storage_offset
    }

    /// Bytes of header and bitmap without padding.
    #[inline]
    pub fn admin_size(&self) -> usize {
        self.bitmap_offset + self.bitmap_words * 8
    }

    #[inline]
    pub fn storage_size(&self) -> usize {
        self.capacity << QUANTUM_SHIFT
    }

    #[inline]
    pub const fn head_link(class: usize) -> Link {
        (Self::HEAD_LINK_BASE + class) as Link
    }

    #[inline]
    pub fn block_link(&self, index: usize) -> Link {
        ((self.storage_offset >> QUANTUM_SHIFT) + index) as Link
    }

    /// Classify `link`. Block links are only valid below `frontier`.
    pub fn link_target(&self, link: Link, frontier: usize) -> Option<LinkTarget> {
        let link = usize::try_from(link).ok()?;
        if let Some(class) = link.checked_sub(Self::HEAD_LINK_BASE) {
            if class < NUM_SIZE_CLASSES {
                return Some(LinkTarget::Head(class));
            }
        }
        let index = link.checked_sub(self.storage_offset >> QUANTUM_SHIFT)?;
        (index < frontier.min(self.capacity)).then_some(LinkTarget::Block(index))
    }
}
