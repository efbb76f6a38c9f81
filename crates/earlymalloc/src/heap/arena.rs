//! The arena: one fixed reservation carved into blocks by a bump frontier and
//! recycled through segregated free lists.
//!
//! All mutation happens under `lock`. `alloc_size`, `owns` and introspection
//! read the bitmap and header counters without it and may see a torn view.

use super::bitmap::{BlockMap, BlockState};
use super::free_list::{self, FreeLink, Link, LinkSpace};
use super::layout::{ArenaHeader, ArenaLayout, LinkTarget, ZoneStatistics};
use super::size_class::{class_ceil, class_floor, quanta_for, NUM_SIZE_CLASSES};
use crate::config::clamp_arena_size;
use crate::hardening::{self, ClientFault, Fault, IntegrityReport, InternalFault};
use crate::platform::{MmapPages, PageProvider};
use crate::sync::RawSpinLock;
use crate::util::{align_up, is_aligned, QUANTUM, QUANTUM_SHIFT};
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicU64, Ordering};

pub struct Arena<P: PageProvider = MmapPages> {
    lock: RawSpinLock,
    /// Header base; the start of the reservation.
    base: NonNull<u8>,
    layout: ArenaLayout,
    pages: P,
}

// SAFETY: the reservation is owned by the arena and every mutation of it is
// serialized by `lock`; unlocked readers only touch atomics.
unsafe impl<P: PageProvider + Send> Send for Arena<P> {}
unsafe impl<P: PageProvider + Sync> Sync for Arena<P> {}

impl<P: PageProvider> Arena<P> {
    /// Reserve and lay out an arena with `arena_size` bytes of block storage.
    ///
    /// The size is clamped to `[MIN_ARENA_SIZE, MAX_ARENA_SIZE]`. Returns
    /// `None` if the provider cannot reserve or populate the metadata.
    ///
    /// The reservation is never returned once the arena exists; dropping an
    /// `Arena` leaks it.
    pub fn create(pages: P, arena_size: usize) -> Option<Self> {
        let layout = ArenaLayout::new(clamp_arena_size(arena_size), pages.page_size());
        let base = pages.reserve(layout.reserved_size)?;
        // SAFETY: the metadata range is the front of the reservation.
        unsafe {
            if !pages.populate(base, layout.metadata_size()) {
                pages.release(base, layout.reserved_size);
                return None;
            }
            base.as_ptr().cast::<ArenaHeader>().write(ArenaHeader::new(&layout));
        }
        let arena = Arena {
            lock: RawSpinLock::new(),
            base,
            layout,
            pages,
        };
        let map = arena.map();
        map.init();
        // Frontier marker for the empty arena.
        map.mark_start(0);
        Some(arena)
    }

    // ------------------------------------------------------------------
    // Regions
    // ------------------------------------------------------------------

    #[inline]
    fn header(&self) -> &ArenaHeader {
        // SAFETY: written in `create` and populated for the arena's lifetime.
        unsafe { &*self.base.as_ptr().cast::<ArenaHeader>() }
    }

    #[inline]
    fn map(&self) -> BlockMap<'_> {
        // SAFETY: the bitmap follows the header inside the populated metadata,
        // is 16-byte aligned and holds `bitmap_words` initialized words.
        let words = unsafe {
            core::slice::from_raw_parts(
                self.base.as_ptr().add(self.layout.bitmap_offset).cast::<AtomicU64>(),
                self.layout.bitmap_words,
            )
        };
        BlockMap::new(words, self.layout.capacity)
    }

    #[inline]
    fn storage(&self) -> *mut u8 {
        // SAFETY: storage_offset is inside the reservation.
        unsafe { self.base.as_ptr().add(self.layout.storage_offset) }
    }

    #[inline]
    fn block_ptr(&self, index: usize) -> NonNull<u8> {
        // SAFETY: index < capacity, and storage is non-null.
        unsafe { NonNull::new_unchecked(self.storage().add(index << QUANTUM_SHIFT)) }
    }

    /// Quantum index of `addr`, if it is a quantum-aligned storage address.
    fn block_index(&self, addr: usize) -> Result<usize, ClientFault> {
        let start = self.storage() as usize;
        let offset = addr.wrapping_sub(start);
        if addr < start || offset >= self.layout.storage_size() {
            return Err(ClientFault::NotOwned);
        }
        if !is_aligned(offset, QUANTUM) {
            return Err(ClientFault::Misaligned);
        }
        Ok(offset >> QUANTUM_SHIFT)
    }

    pub fn layout(&self) -> &ArenaLayout {
        &self.layout
    }

    /// Current bump frontier in quanta.
    pub fn frontier(&self) -> usize {
        self.header().frontier()
    }

    /// Highest frontier reached so far, in quanta.
    pub fn high_water(&self) -> usize {
        self.header().high_water()
    }

    /// The arena's own base address, where its header lives.
    pub fn zone_base(&self) -> NonNull<u8> {
        self.base
    }

    // ------------------------------------------------------------------
    // Locking
    // ------------------------------------------------------------------

    pub fn lock(&self) {
        self.lock.lock();
    }

    /// # Safety
    /// The caller must hold the lock through a previous `lock()`.
    pub unsafe fn unlock(&self) {
        self.lock.unlock();
    }

    /// Reset the lock after fork.
    ///
    /// # Safety
    /// Only sound in a single-threaded child process.
    pub unsafe fn reinit_lock(&self) {
        self.lock.force_unlock();
    }

    // ------------------------------------------------------------------
    // Allocate
    // ------------------------------------------------------------------

    /// Allocate `size` bytes, zero filled and quantum aligned.
    ///
    /// `Ok(None)` means the request is too large or the arena is full.
    pub fn try_alloc(&self, size: usize) -> Result<Option<NonNull<u8>>, Fault> {
        let Some(need) = quanta_for(size) else {
            return Ok(None);
        };
        let Some(class) = class_ceil(need) else {
            return Ok(None);
        };

        let _guard = self.lock.guard();
        let index = match self.take_free(need, class)? {
            Some(index) => index,
            None => match self.bump(need) {
                Some(index) => index,
                None => return Ok(None),
            },
        };
        self.map().mark_allocated(index, need);

        let header = self.header();
        header.blocks_in_use.fetch_add(1, Ordering::Relaxed);
        header
            .bytes_in_use
            .fetch_add((need << QUANTUM_SHIFT) as u64, Ordering::Relaxed);
        Ok(Some(self.block_ptr(index)))
    }

    /// Allocate `size` bytes. Detected corruption is fatal.
    pub fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        match self.try_alloc(size) {
            Ok(ptr) => ptr,
            Err(fault) => hardening::fatal(fault, self.base.as_ptr() as usize),
        }
    }

    /// Pop the first block from the lowest non-empty class at or above
    /// `class`, splitting off any excess. Lock must be held.
    fn take_free(&self, need: usize, class: usize) -> Result<Option<usize>, Fault> {
        let map = self.map();
        let frontier = self.frontier();
        for c in class..NUM_SIZE_CLASSES {
            let Some(link) = free_list::first(self, ArenaLayout::head_link(c))? else {
                continue;
            };
            let index = match self.layout.link_target(link, frontier) {
                Some(LinkTarget::Block(index)) => index,
                _ => return Err(InternalFault::FreeListCorrupted.into()),
            };
            free_list::remove(self, link)?;

            if !map.is_start(index) || map.is_allocated(index) {
                return Err(InternalFault::FreeListCorrupted.into());
            }
            let size = map.block_size(index);
            if size < need || index + size > frontier || class_floor(size) != c {
                return Err(InternalFault::FreeListCorrupted.into());
            }

            if size > need {
                let rest = index + need;
                map.mark_start(rest);
                map.mark_free(rest, size - need);
                free_list::insert(
                    self,
                    ArenaLayout::head_link(class_floor(size - need)),
                    self.layout.block_link(rest),
                )?;
            }
            return Ok(Some(index));
        }
        Ok(None)
    }

    /// Carve `need` quanta at the frontier. Lock must be held.
    fn bump(&self, need: usize) -> Option<usize> {
        let header = self.header();
        let index = header.frontier();
        let end = index + need;
        if end > self.layout.capacity {
            return None;
        }

        let high_water = header.high_water();
        if end > high_water {
            let page = self.pages.page_size();
            let from = align_up(high_water << QUANTUM_SHIFT, page);
            let to = align_up(end << QUANTUM_SHIFT, page);
            if to > from {
                // SAFETY: [from, to) lies within the page-rounded storage range.
                let populated = unsafe {
                    self.pages
                        .populate(NonNull::new_unchecked(self.storage().add(from)), to - from)
                };
                if !populated {
                    return None;
                }
            }
            header.high_water.store(end as u64, Ordering::Relaxed);
        }

        self.map().mark_start(end);
        header.frontier.store(end as u64, Ordering::Relaxed);
        Some(index)
    }

    // ------------------------------------------------------------------
    // Free
    // ------------------------------------------------------------------

    /// Size in quanta of the live allocation at `index`, read without the lock.
    fn allocated_size(&self, index: usize) -> Result<usize, Fault> {
        let frontier = self.frontier();
        let map = self.map();
        if index >= frontier || !map.is_start(index) {
            return Err(ClientFault::NotAllocated.into());
        }
        if !map.is_allocated(index) {
            return Err(ClientFault::DoubleFree.into());
        }
        let size = map.block_size(index);
        if size == 0 || index + size > frontier {
            return Err(InternalFault::BitmapCorrupted.into());
        }
        Ok(size)
    }

    /// Free the allocation at `ptr`. A null pointer is ignored.
    ///
    /// # Safety
    /// If `ptr` is a live allocation of this arena, nothing may use it afterwards.
    pub unsafe fn try_free(&self, ptr: *mut u8) -> Result<(), Fault> {
        if ptr.is_null() {
            return Ok(());
        }
        let index = self.block_index(ptr as usize)?;
        let size = self.allocated_size(index)?;
        ptr::write_bytes(ptr, 0, size << QUANTUM_SHIFT);

        let _guard = self.lock.guard();
        match self.allocated_size(index) {
            Ok(current) if current == size => {}
            _ => return Err(InternalFault::StateChanged.into()),
        }
        self.release(index, size)
    }

    /// Free `ptr`. Misuse and detected corruption are fatal.
    ///
    /// # Safety
    /// See [`Arena::try_free`].
    pub unsafe fn free(&self, ptr: *mut u8) {
        if let Err(fault) = self.try_free(ptr) {
            hardening::fatal(fault, ptr as usize);
        }
    }

    /// Return a validated allocated block, coalescing with free neighbors and
    /// retracting the frontier when possible. Lock must be held.
    ///
    /// Neighbors and lists are checked before anything is written, so an
    /// `Err` leaves the block allocated and the counters untouched.
    fn release(&self, index: usize, size: usize) -> Result<(), Fault> {
        let header = self.header();
        let map = self.map();
        let frontier = header.frontier();

        let left = if map.prev_is_allocated(index) {
            0
        } else {
            let left = map.prev_block_size(index);
            if left == 0 || left > index || !map.is_start(index - left) {
                return Err(InternalFault::BitmapCorrupted.into());
            }
            free_list::verify(self, self.layout.block_link(index - left))?;
            left
        };

        let right = index + size;
        let right_size = if right < frontier && !map.is_allocated(right) {
            let right_size = map.block_size(right);
            if right_size == 0 || right + right_size > frontier {
                return Err(InternalFault::BitmapCorrupted.into());
            }
            free_list::verify(self, self.layout.block_link(right))?;
            right_size
        } else {
            0
        };

        let start = index - left;
        let len = left + size + right_size;
        let retract = start + len == frontier;
        let class_head = ArenaLayout::head_link(class_floor(len));
        if !retract {
            free_list::verify_head(self, class_head)?;
        }

        if left > 0 {
            free_list::remove(self, self.layout.block_link(start))?;
            map.clear_start(index);
        }
        if right_size > 0 {
            free_list::remove(self, self.layout.block_link(right))?;
            map.clear_start(right);
        }
        map.mark_free(start, len);
        if retract {
            if frontier != self.layout.capacity {
                map.clear_start(frontier);
            }
            header.frontier.store(start as u64, Ordering::Relaxed);
        } else {
            free_list::insert(self, class_head, self.layout.block_link(start))?;
        }

        header.blocks_in_use.fetch_sub(1, Ordering::Relaxed);
        header
            .bytes_in_use
            .fetch_sub((size << QUANTUM_SHIFT) as u64, Ordering::Relaxed);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Usable size of the allocation at `ptr` in bytes, or 0 if `ptr` is not
    /// a live allocation of this arena. Lock free.
    pub fn alloc_size(&self, ptr: *const u8) -> usize {
        self.block_index(ptr as usize)
            .ok()
            .and_then(|index| self.allocated_size(index).ok())
            .map_or(0, |size| size << QUANTUM_SHIFT)
    }

    /// Whether `ptr` is a quantum-aligned address inside block storage.
    /// Range check only; the bitmap is not consulted.
    ///
    /// Storage is `capacity` whole quanta. Page padding past the last quantum
    /// is not owned, so freeing it is `NotOwned` rather than `NotAllocated`.
    #[inline]
    pub fn owns(&self, ptr: *const u8) -> bool {
        self.block_index(ptr as usize).is_ok()
    }

    pub fn statistics(&self) -> ZoneStatistics {
        self.header().statistics()
    }

    /// Walk every block and free list under the lock.
    pub fn check_integrity(&self) -> IntegrityReport {
        let _guard = self.lock.guard();
        let header = self.header();
        let map = self.map();
        let frontier = header.frontier();
        let mut report = IntegrityReport::default();

        let mut bytes_in_use = 0usize;
        let mut prev_state = BlockState::Allocated;
        for item in map.walk(frontier) {
            let Ok(block) = item else {
                report.partition_error();
                break;
            };
            report.total_blocks += 1;
            match block.state {
                BlockState::Allocated => {
                    report.allocated_blocks += 1;
                    bytes_in_use += block.size << QUANTUM_SHIFT;
                }
                BlockState::Free => {
                    report.free_blocks += 1;
                    if prev_state == BlockState::Free {
                        report.uncoalesced();
                    }
                    if block.end() == frontier {
                        report.uncoalesced();
                    }
                }
            }
            prev_state = block.state;
        }

        let mut listed = 0usize;
        for class in 0..NUM_SIZE_CLASSES {
            for entry in free_list::entries(self, ArenaLayout::head_link(class), report.free_blocks) {
                let Ok(link) = entry else {
                    report.free_list_error();
                    break;
                };
                listed += 1;
                let valid = match self.layout.link_target(link, frontier) {
                    Some(LinkTarget::Block(index)) => {
                        map.is_start(index)
                            && !map.is_allocated(index)
                            && class_floor(map.block_size(index)) == class
                    }
                    _ => false,
                };
                if !valid {
                    report.free_list_error();
                }
            }
        }
        if listed != report.free_blocks {
            report.free_list_error();
        }

        if header.blocks_in_use.load(Ordering::Relaxed) as usize != report.allocated_blocks {
            report.counter_mismatch();
        }
        if header.bytes_in_use.load(Ordering::Relaxed) as usize != bytes_in_use {
            report.counter_mismatch();
        }
        report
    }
}

impl<P: PageProvider> LinkSpace for Arena<P> {
    fn node(&self, link: Link) -> Result<&FreeLink, InternalFault> {
        let offset = match self.layout.link_target(link, self.frontier()) {
            Some(LinkTarget::Head(class)) => {
                core::mem::offset_of!(ArenaHeader, heads) + class * QUANTUM
            }
            Some(LinkTarget::Block(index)) => self.layout.storage_offset + (index << QUANTUM_SHIFT),
            None => return Err(InternalFault::LinkOutOfBounds),
        };
        // SAFETY: heads live in the header; block links are below the frontier
        // and therefore in populated storage. Both are 16-byte aligned.
        Ok(unsafe { &*self.base.as_ptr().add(offset).cast::<FreeLink>() })
    }
}
