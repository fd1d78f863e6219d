//! # Boot-Time Physical Memory

use crate::memory::{PAGE_FRAME, PAGE_SIZE};

/// The range of RAM left for page frames once the kernel image is loaded.
///
/// The platform reports `[first, last)` in physical addresses. Both ends are
/// trimmed to whole frames: `first` is rounded up, `last` rounded down.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PhysicalMemory {
    first: u32,
    last: u32,
}

impl PhysicalMemory {
    /// Describes the RAM range `[first, last)`.
    ///
    /// An inverted or sub-frame range yields zero frames.
    #[must_use]
    pub const fn new(first: u32, last: u32) -> Self {
        let first = first.next_multiple_of(PAGE_SIZE);
        let last = last & PAGE_FRAME;
        if last < first {
            Self { first, last: first }
        } else {
            Self { first, last }
        }
    }

    /// A range of exactly `frames` frames starting at physical address `first`.
    #[must_use]
    pub const fn with_frames(first: u32, frames: u32) -> Self {
        let first = first.next_multiple_of(PAGE_SIZE);
        Self {
            first,
            last: first + frames * PAGE_SIZE,
        }
    }

    /// Physical address of frame 0.
    #[inline]
    #[must_use]
    pub const fn first_frame_paddr(&self) -> u32 {
        self.first
    }

    /// One past the last usable physical byte.
    #[inline]
    #[must_use]
    pub const fn end_paddr(&self) -> u32 {
        self.last
    }

    /// Number of page frames in the range.
    #[inline]
    #[must_use]
    pub const fn frame_count(&self) -> usize {
        ((self.last - self.first) / PAGE_SIZE) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_to_whole_frames() {
        let mem = PhysicalMemory::new(0x0003_4567, 0x0010_0fff);
        assert_eq!(mem.first_frame_paddr(), 0x0003_5000);
        assert_eq!(mem.end_paddr(), 0x0010_0000);
        assert_eq!(mem.frame_count(), (0x0010_0000 - 0x0003_5000) / 4096);
    }

    #[test]
    fn inverted_range_is_empty() {
        let mem = PhysicalMemory::new(0x0020_0000, 0x0010_0000);
        assert_eq!(mem.frame_count(), 0);
    }

    #[test]
    fn with_frames_counts_exactly() {
        let mem = PhysicalMemory::with_frames(0x1000, 32);
        assert_eq!(mem.frame_count(), 32);
        assert_eq!(mem.end_paddr(), 0x1000 + 32 * 4096);
    }
}
