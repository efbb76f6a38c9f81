//! Boundary-tag bitmap: block starts, allocation state and sizes for every
//! quantum of the arena, with nothing stored in block payloads.
//!
//! The bitmap is a run of 64-quantum windows. Each window is two `u64` words,
//! the start plane followed by the state plane:
//!
//! - start plane: bit set where a block begins, at the bump frontier, and at
//!   both sentinels.
//! - state plane: at a block's first and last quantum, 1 = allocated and
//!   0 = free. Blocks of `WINDOW_QUANTA` or more also carry their size in
//!   `SIZE_FIELD_BITS`-wide fields just inside both ends (head field right
//!   after the first quantum, tail field right before the last). Other
//!   interior state bits are meaningless.
//!
//! Bit positions are shifted by one relative to quantum indices so that the
//! left sentinel sits at position 0 and the right sentinel at `quanta + 1`.
//! Both sentinels read as allocated block starts, which keeps neighbor checks
//! at the arena edges branch-free.
//!
//! Words are atomics so that lock-free size queries can read them while a
//! locked writer updates them. Writers must hold the arena lock.

use core::sync::atomic::{AtomicU64, Ordering};

/// Quanta per bitmap window.
pub const WINDOW_QUANTA: usize = 64;

/// Width of the explicit size fields of large blocks.
pub const SIZE_FIELD_BITS: usize = 30;

/// Largest block size the size fields can express.
pub const MAX_BLOCK_QUANTA: usize = (1 << SIZE_FIELD_BITS) - 1;

const START_PLANE: usize = 0;
const STATE_PLANE: usize = 1;
const PLANES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Free,
    Allocated,
}

/// Decoded view of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Index of the first quantum.
    pub index: usize,
    /// Length in quanta.
    pub size: usize,
    pub state: BlockState,
}

impl Block {
    #[inline]
    pub fn is_allocated(&self) -> bool {
        self.state == BlockState::Allocated
    }

    /// Index one past the last quantum.
    #[inline]
    pub fn end(&self) -> usize {
        self.index + self.size
    }
}

/// A block whose decoded size is zero or runs past the frontier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MalformedBlock {
    pub index: usize,
    pub size: usize,
}

#[inline(always)]
const fn low_mask(width: usize) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Codec over the bitmap words of an arena with `quanta` quanta.
#[derive(Clone, Copy)]
pub struct BlockMap<'a> {
    words: &'a [AtomicU64],
    quanta: usize,
}

impl<'a> BlockMap<'a> {
    /// Number of u64 words needed for `quanta` quanta: both sentinels plus one
    /// trailing padding window so two-window scans never leave the slice.
    pub const fn words_for(quanta: usize) -> usize {
        ((quanta + 2).div_ceil(WINDOW_QUANTA) + 1) * PLANES
    }

    pub fn new(words: &'a [AtomicU64], quanta: usize) -> Self {
        debug_assert!(words.len() >= Self::words_for(quanta));
        debug_assert!(quanta <= MAX_BLOCK_QUANTA);
        BlockMap { words, quanta }
    }

    /// Clear every word and plant both sentinels.
    pub fn init(&self) {
        for word in self.words {
            word.store(0, Ordering::Relaxed);
        }
        for pos in [0, self.quanta + 1] {
            self.set(START_PLANE, pos, true);
            self.set(STATE_PLANE, pos, true);
        }
    }

    // ------------------------------------------------------------------
    // Raw bit access
    // ------------------------------------------------------------------

    #[inline(always)]
    fn word(&self, plane: usize, window: usize) -> &AtomicU64 {
        &self.words[window * PLANES + plane]
    }

    #[inline(always)]
    fn test(&self, plane: usize, pos: usize) -> bool {
        let word = self.word(plane, pos / 64).load(Ordering::Relaxed);
        word & (1u64 << (pos % 64)) != 0
    }

    #[inline(always)]
    fn set(&self, plane: usize, pos: usize, value: bool) {
        let word = self.word(plane, pos / 64);
        let bit = 1u64 << (pos % 64);
        let old = word.load(Ordering::Relaxed);
        let new = if value { old | bit } else { old & !bit };
        word.store(new, Ordering::Relaxed);
    }

    /// Read `width` (<= 64) bits starting at `pos`; bit 0 of the result is `pos`.
    /// Spans at most two windows.
    #[inline]
    fn read_bits(&self, plane: usize, pos: usize, width: usize) -> u64 {
        debug_assert!(width <= 64);
        if width == 0 {
            return 0;
        }
        let window = pos / 64;
        let offset = pos % 64;
        let lo_width = width.min(64 - offset);
        let mut value = (self.word(plane, window).load(Ordering::Relaxed) >> offset) & low_mask(lo_width);
        if lo_width < width {
            let hi = self.word(plane, window + 1).load(Ordering::Relaxed) & low_mask(width - lo_width);
            value |= hi << lo_width;
        }
        value
    }

    /// Write the low `width` (<= 64) bits of `value` starting at `pos`.
    #[inline]
    fn write_bits(&self, plane: usize, pos: usize, width: usize, value: u64) {
        debug_assert!(width <= 64);
        if width == 0 {
            return;
        }
        let window = pos / 64;
        let offset = pos % 64;
        let lo_width = width.min(64 - offset);

        let word = self.word(plane, window);
        let mask = low_mask(lo_width) << offset;
        let old = word.load(Ordering::Relaxed);
        word.store((old & !mask) | ((value << offset) & mask), Ordering::Relaxed);

        if lo_width < width {
            let word = self.word(plane, window + 1);
            let mask = low_mask(width - lo_width);
            let old = word.load(Ordering::Relaxed);
            word.store((old & !mask) | ((value >> lo_width) & mask), Ordering::Relaxed);
        }
    }

    // ------------------------------------------------------------------
    // Start markers
    // ------------------------------------------------------------------

    #[inline]
    pub fn is_start(&self, index: usize) -> bool {
        self.test(START_PLANE, index + 1)
    }

    #[inline]
    pub fn mark_start(&self, index: usize) {
        self.set(START_PLANE, index + 1, true);
    }

    #[inline]
    pub fn clear_start(&self, index: usize) {
        debug_assert!(index < self.quanta, "cannot clear the right sentinel");
        self.set(START_PLANE, index + 1, false);
    }

    // ------------------------------------------------------------------
    // Allocation state
    // ------------------------------------------------------------------

    /// State of the block starting at `index`.
    #[inline]
    pub fn is_allocated(&self, index: usize) -> bool {
        self.test(STATE_PLANE, index + 1)
    }

    /// State of the block ending just before `index`, read from its last quantum.
    #[inline]
    pub fn prev_is_allocated(&self, index: usize) -> bool {
        self.test(STATE_PLANE, index)
    }

    // ------------------------------------------------------------------
    // Sizes
    // ------------------------------------------------------------------

    /// Size in quanta of the block starting at `index`.
    ///
    /// Small blocks are measured by the distance to the next start marker
    /// within the following 63 positions; if there is none the block is large
    /// and its head size field is read.
    pub fn block_size(&self, index: usize) -> usize {
        let pos = index + 1;
        let ahead = self.read_bits(START_PLANE, pos + 1, WINDOW_QUANTA - 1);
        if ahead != 0 {
            ahead.trailing_zeros() as usize + 1
        } else {
            self.read_bits(STATE_PLANE, pos + 1, SIZE_FIELD_BITS) as usize
        }
    }

    /// Size in quanta of the block ending just before `index`.
    /// Only meaningful when that block is free or otherwise well formed.
    pub fn prev_block_size(&self, index: usize) -> usize {
        let pos = index + 1;
        let from = pos.saturating_sub(WINDOW_QUANTA - 1);
        let behind = self.read_bits(START_PLANE, from, pos - from);
        if behind != 0 {
            let nearest = from + 63 - behind.leading_zeros() as usize;
            pos - nearest
        } else {
            match pos.checked_sub(1 + SIZE_FIELD_BITS) {
                Some(tail) => self.read_bits(STATE_PLANE, tail, SIZE_FIELD_BITS) as usize,
                None => 0,
            }
        }
    }

    #[inline]
    pub fn mark_allocated(&self, index: usize, size: usize) {
        self.write_state(index, size, true);
    }

    #[inline]
    pub fn mark_free(&self, index: usize, size: usize) {
        self.write_state(index, size, false);
    }

    fn write_state(&self, index: usize, size: usize, allocated: bool) {
        debug_assert!(size > 0 && size <= MAX_BLOCK_QUANTA);
        debug_assert!(index + size <= self.quanta);
        let first = index + 1;
        let last = first + size - 1;
        self.set(STATE_PLANE, first, allocated);
        self.set(STATE_PLANE, last, allocated);
        if size >= WINDOW_QUANTA {
            self.write_bits(STATE_PLANE, first + 1, SIZE_FIELD_BITS, size as u64);
            self.write_bits(STATE_PLANE, last - SIZE_FIELD_BITS, SIZE_FIELD_BITS, size as u64);
        }
    }

    // ------------------------------------------------------------------
    // Descriptors
    // ------------------------------------------------------------------

    /// Decode the block starting at `index`. Caller must know `index` is a start.
    #[inline]
    pub fn block(&self, index: usize) -> Block {
        Block {
            index,
            size: self.block_size(index),
            state: if self.is_allocated(index) {
                BlockState::Allocated
            } else {
                BlockState::Free
            },
        }
    }

    /// Walk every block in `[0, frontier)` in address order.
    pub fn walk(&self, frontier: usize) -> Walk<'a> {
        Walk {
            map: *self,
            next: 0,
            frontier: frontier.min(self.quanta),
        }
    }
}

/// Iterator over the blocks below a frontier. Stops after the first
/// malformed block.
pub struct Walk<'a> {
    map: BlockMap<'a>,
    next: usize,
    frontier: usize,
}

impl Iterator for Walk<'_> {
    type Item = Result<Block, MalformedBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.frontier {
            return None;
        }
        let block = self.map.block(self.next);
        if block.size == 0 || block.end() > self.frontier {
            self.next = self.frontier;
            return Some(Err(MalformedBlock {
                index: block.index,
                size: block.size,
            }));
        }
        self.next = block.end();
        Some(Ok(block))
    }
}
