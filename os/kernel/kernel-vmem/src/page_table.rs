//! # Per-process page table
//!
//! A flat array of [`PageTableEntry`] slots mapping virtual page numbers to
//! coremap frames. The array is sized once when the address space is created
//! (two entries per physical frame) and is never resized or moved.
//!
//! Lookups are a linear scan over all slots; the table is small and the
//! common path (TLB refill) only runs on a miss.
//!
//! ## Entry layout
//!
//! | Bits   | Field              | Meaning                                  |
//! |--------|--------------------|------------------------------------------|
//! | 0      | `present`          | Slot holds a live mapping                |
//! | 1      | `in_valid_region`  | Page lies inside a defined region        |
//! | 2–11   | reserved           |                                          |
//! | 12–31  | virtual page       | All ones while unset                     |
//! | 32–51  | frame number       | Coremap index, all ones while unset      |
//! | 52–63  | reserved           |                                          |

use crate::addresses::{FrameNumber, VirtualPageNumber};
use crate::coremap::Coremap;
use crate::error::VmError;
use crate::phys_mapper::PhysMapper;
use alloc::boxed::Box;
use alloc::vec::Vec;
use bitfield_struct::bitfield;
use core::ops::Range;
use log::trace;

/// Value of an unset page or frame field.
pub const UNSET_FIELD: u32 = 0xF_FFFF;

/// One page-table slot in packed form.
#[bitfield(u64)]
#[derive(Eq, PartialEq)]
pub struct PageTableEntry {
    /// Slot holds a live mapping. Implies the frame is in use and owned by
    /// this entry.
    pub present: bool,

    /// The mapped page lies inside one of the address space's regions.
    pub in_valid_region: bool,

    #[bits(10)]
    __reserved: u16,

    #[bits(20, default = UNSET_FIELD)]
    vpn_bits: u32,

    #[bits(20, default = UNSET_FIELD)]
    frame_bits: u32,

    #[bits(12)]
    __pad: u16,
}

impl PageTableEntry {
    /// An empty slot: not present, both numeric fields unset.
    pub const UNSET: Self = Self::new();

    /// A present mapping of `page` to `frame`.
    #[inline]
    #[must_use]
    pub const fn mapping(page: VirtualPageNumber, frame: FrameNumber) -> Self {
        Self::new()
            .with_present(true)
            .with_in_valid_region(true)
            .with_vpn_bits(page.as_u32())
            .with_frame_bits(frame.as_u32())
    }

    /// The mapped virtual page, `None` while unset.
    #[inline]
    #[must_use]
    pub const fn page(&self) -> Option<VirtualPageNumber> {
        match self.vpn_bits() {
            UNSET_FIELD => None,
            vpn => Some(VirtualPageNumber::new(vpn)),
        }
    }

    /// The backing frame, `None` while unset.
    #[inline]
    #[must_use]
    pub const fn frame(&self) -> Option<FrameNumber> {
        match self.frame_bits() {
            UNSET_FIELD => None,
            f => Some(FrameNumber::new(f)),
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_unset(&self) -> bool {
        self.into_bits() == Self::UNSET.into_bits()
    }
}

/// Flat page table owned by one address space.
pub struct PageTable {
    entries: Box<[PageTableEntry]>,
}

impl PageTable {
    /// A table of `capacity` unset slots.
    ///
    /// # Errors
    /// [`VmError::OutOfMemory`] if the slot array cannot be allocated.
    pub fn new(capacity: usize) -> Result<Self, VmError> {
        let mut entries = Vec::new();
        entries
            .try_reserve_exact(capacity)
            .map_err(|_| VmError::OutOfMemory)?;
        entries.resize(capacity, PageTableEntry::UNSET);
        Ok(Self {
            entries: entries.into_boxed_slice(),
        })
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Slot and entry of the present mapping for `page`.
    #[must_use]
    pub fn lookup(&self, page: VirtualPageNumber) -> Option<(usize, PageTableEntry)> {
        self.entries()
            .find(|(_, e)| e.page() == Some(page))
    }

    /// The entry in `slot`, present or not.
    #[must_use]
    pub fn entry(&self, slot: usize) -> Option<PageTableEntry> {
        self.entries.get(slot).copied()
    }

    /// Map `page` to `frame` in the first free slot and return that slot.
    ///
    /// # Errors
    /// [`VmError::OutOfMemory`] if every slot is taken.
    ///
    /// # Panics
    /// If `page` is already mapped.
    pub fn map(&mut self, page: VirtualPageNumber, frame: FrameNumber) -> Result<usize, VmError> {
        assert!(self.lookup(page).is_none(), "{page} mapped twice");
        let slot = self
            .entries
            .iter()
            .position(|e| !e.present())
            .ok_or(VmError::OutOfMemory)?;
        self.map_at(slot, PageTableEntry::mapping(page, frame));
        Ok(slot)
    }

    /// Install a present `entry` in a specific slot, flags included.
    ///
    /// # Panics
    /// If the slot is out of range or already present, or if `entry` is not
    /// a complete present mapping.
    pub fn map_at(&mut self, slot: usize, entry: PageTableEntry) {
        let (true, Some(page), Some(frame)) = (entry.present(), entry.page(), entry.frame()) else {
            panic!("slot {slot}: incomplete mapping {entry:?}");
        };
        let current = &mut self.entries[slot];
        assert!(!current.present(), "slot {slot} already holds {current:?}");
        *current = entry;
        trace!("page table: slot {slot}: {page} -> {frame}");
    }

    /// Remove the mapping for `page` and release its frame. Returns the frame
    /// that backed it, or `None` if `page` was not mapped.
    ///
    /// # Panics
    /// If the coremap disagrees about the frame's state.
    pub fn unmap<M: PhysMapper>(
        &mut self,
        page: VirtualPageNumber,
        coremap: &Coremap<M>,
    ) -> Option<FrameNumber> {
        let (slot, _) = self.lookup(page)?;
        Some(self.release_slot(slot, coremap))
    }

    /// Unmap every present page in `pages`. Returns how many were released.
    pub fn unmap_range<M: PhysMapper>(
        &mut self,
        pages: Range<VirtualPageNumber>,
        coremap: &Coremap<M>,
    ) -> usize {
        let mut released = 0;
        for slot in 0..self.entries.len() {
            let in_range = self.entries[slot]
                .page()
                .is_some_and(|p| pages.contains(&p));
            if self.entries[slot].present() && in_range {
                self.release_slot(slot, coremap);
                released += 1;
            }
        }
        released
    }

    /// Unmap everything. Returns how many frames were released.
    pub fn clear<M: PhysMapper>(&mut self, coremap: &Coremap<M>) -> usize {
        let mut released = 0;
        for slot in 0..self.entries.len() {
            if self.entries[slot].present() {
                self.release_slot(slot, coremap);
                released += 1;
            }
        }
        released
    }

    fn release_slot<M: PhysMapper>(&mut self, slot: usize, coremap: &Coremap<M>) -> FrameNumber {
        let entry = core::mem::replace(&mut self.entries[slot], PageTableEntry::UNSET);
        let Some(frame) = entry.frame() else {
            panic!("present slot {slot} without a frame: {entry:?}");
        };
        if let Err(e) = coremap.free(frame) {
            panic!("slot {slot} referenced {frame} but the coremap refused it: {e}");
        }
        trace!("page table: slot {slot} released {frame}");
        frame
    }

    /// Present entries together with their slot index.
    pub fn entries(&self) -> impl Iterator<Item = (usize, PageTableEntry)> + '_ {
        self.entries
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, e)| e.present())
    }

    #[must_use]
    pub fn present_count(&self) -> usize {
        self.entries().count()
    }
}

impl core::fmt::Debug for PageTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PageTable")
            .field("capacity", &self.capacity())
            .field("present", &self.present_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_space::AddressSpaceId;
    use crate::coremap::FrameOwner;
    use crate::phys_mapper::RamMapper;
    use kernel_info::boot::PhysicalMemory;

    fn coremap(frames: u32) -> Coremap<RamMapper> {
        let mem = PhysicalMemory::with_frames(0x0020_0000, frames);
        Coremap::new(mem, RamMapper::new(mem)).unwrap()
    }

    fn page(coremap: &Coremap<RamMapper>, vpn: u32) -> (VirtualPageNumber, FrameNumber) {
        let page = VirtualPageNumber::new(vpn);
        let owner = FrameOwner {
            space: AddressSpaceId::next(),
            page,
        };
        (page, coremap.allocate_page(owner).unwrap())
    }

    #[test]
    fn unset_entry_has_all_ones_fields() {
        let e = PageTableEntry::UNSET;
        assert!(!e.present());
        assert!(!e.in_valid_region());
        assert_eq!(e.page(), None);
        assert_eq!(e.frame(), None);
        assert_eq!(e.into_bits(), 0x000F_FFFF_FFFF_F000);
        assert!(e.is_unset());
    }

    #[test]
    fn mapping_entry_round_trips_fields() {
        let e = PageTableEntry::mapping(VirtualPageNumber::new(0x7FFFF), FrameNumber::new(3));
        assert!(e.present() && e.in_valid_region());
        assert_eq!(e.page(), Some(VirtualPageNumber::new(0x7FFFF)));
        assert_eq!(e.frame(), Some(FrameNumber::new(3)));
        assert!(!e.is_unset());
    }

    #[test]
    fn fresh_table_is_empty() {
        let table = PageTable::new(16).unwrap();
        assert_eq!(table.capacity(), 16);
        assert_eq!(table.present_count(), 0);
        assert!((0..16).all(|i| table.entry(i) == Some(PageTableEntry::UNSET)));
    }

    #[test]
    fn map_uses_first_free_slot() {
        let cm = coremap(4);
        let mut table = PageTable::new(4).unwrap();
        let (p0, f0) = page(&cm, 0x400);
        let (p1, f1) = page(&cm, 0x401);
        assert_eq!(table.map(p0, f0), Ok(0));
        assert_eq!(table.map(p1, f1), Ok(1));

        assert_eq!(table.unmap(p0, &cm), Some(f0));
        let (p2, f2) = page(&cm, 0x402);
        assert_eq!(table.map(p2, f2), Ok(0));
        assert_eq!(table.lookup(p1).map(|(slot, _)| slot), Some(1));
    }

    #[test]
    fn full_table_reports_oom() {
        let cm = coremap(2);
        let mut table = PageTable::new(1).unwrap();
        let (p0, f0) = page(&cm, 1);
        let (p1, f1) = page(&cm, 2);
        table.map(p0, f0).unwrap();
        assert_eq!(table.map(p1, f1), Err(VmError::OutOfMemory));
    }

    #[test]
    fn unmap_frees_frame() {
        let cm = coremap(2);
        let mut table = PageTable::new(4).unwrap();
        let (p, f) = page(&cm, 7);
        table.map(p, f).unwrap();
        assert_eq!(cm.free_frames(), 1);

        assert_eq!(table.unmap(p, &cm), Some(f));
        assert_eq!(cm.free_frames(), 2);
        assert_eq!(table.lookup(p), None);
        assert_eq!(table.unmap(p, &cm), None);
    }

    #[test]
    fn unmap_range_only_touches_range() {
        let cm = coremap(4);
        let mut table = PageTable::new(8).unwrap();
        for vpn in 10..14 {
            let (p, f) = page(&cm, vpn);
            table.map(p, f).unwrap();
        }
        let released = table.unmap_range(
            VirtualPageNumber::new(11)..VirtualPageNumber::new(13),
            &cm,
        );
        assert_eq!(released, 2);
        let left: Vec<u32> = table
            .entries()
            .filter_map(|(_, e)| e.page())
            .map(VirtualPageNumber::as_u32)
            .collect();
        assert_eq!(left, [10, 13]);
        assert_eq!(table.clear(&cm), 2);
        assert_eq!(cm.free_frames(), 4);
    }

    #[test]
    fn map_at_keeps_entry_flags() {
        let cm = coremap(2);
        let mut table = PageTable::new(4).unwrap();
        let (p, f) = page(&cm, 9);
        let entry = PageTableEntry::mapping(p, f).with_in_valid_region(false);
        table.map_at(2, entry);
        assert_eq!(table.entry(2), Some(entry));
        assert_eq!(table.lookup(p), Some((2, entry)));
        assert!(!table.entry(2).unwrap().in_valid_region());
        table.clear(&cm);
    }

    #[test]
    #[should_panic(expected = "incomplete mapping")]
    fn map_at_rejects_unset_entry() {
        let mut table = PageTable::new(1).unwrap();
        table.map_at(0, PageTableEntry::UNSET);
    }

    #[test]
    #[should_panic(expected = "mapped twice")]
    fn double_map_panics() {
        let cm = coremap(2);
        let mut table = PageTable::new(4).unwrap();
        let (p, f0) = page(&cm, 5);
        let (_, f1) = page(&cm, 6);
        table.map(p, f0).unwrap();
        let _ = table.map(p, f1);
    }
}
