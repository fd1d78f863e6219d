//! Deep copy of an address space for `fork`.

use super::AddressSpace;
use crate::coremap::FrameOwner;
use crate::error::VmError;
use crate::page_table::PageTableEntry;
use crate::phys_mapper::PhysMapper;
use log::{debug, warn};

impl<M: PhysMapper> AddressSpace<'_, M> {
    /// A new space with the same layout and a private copy of every mapped
    /// page, each in the same page-table slot as in `self`.
    ///
    /// # Errors
    /// [`VmError::OutOfMemory`] if the copy cannot be completed. Everything
    /// the partial copy had acquired is released again.
    pub fn try_clone(&self) -> Result<Self, VmError> {
        let mut child = Self::create(self.coremap)?;
        child.text = self.text;
        child.data = self.data;
        child.heap = self.heap;
        child.stack_base = self.stack_base;
        child.loading = self.loading;

        for (slot, entry) in self.table.entries() {
            let (Some(page), Some(src)) = (entry.page(), entry.frame()) else {
                panic!("{}: present slot {slot} is incomplete: {entry:?}", self.id);
            };
            let owner = FrameOwner {
                space: child.id,
                page,
            };
            let dst = self.coremap.allocate_page(owner).map_err(|_| {
                warn!("{}: copy into {} ran out of frames at {page}", self.id, child.id);
                VmError::OutOfMemory
            })?;
            let copy = PageTableEntry::mapping(page, dst)
                .with_in_valid_region(entry.in_valid_region());
            child.table.map_at(slot, copy);
            self.coremap.copy_frame(src, dst);
        }

        debug!(
            "{}: copied into {} ({} page(s))",
            self.id,
            child.id,
            child.table.present_count()
        );
        Ok(child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_space::tests::coremap;
    use crate::addresses::VirtualPageNumber;
    use crate::phys_mapper::RamMapper;

    fn slots(space: &AddressSpace<'_, RamMapper>) -> Vec<(usize, Option<VirtualPageNumber>)> {
        space
            .page_table()
            .entries()
            .map(|(slot, e)| (slot, e.page()))
            .collect()
    }

    #[test]
    fn copy_preserves_slots_and_layout() {
        let cm = coremap(6);
        let mut parent = AddressSpace::create(&cm).unwrap();
        parent.prepare_load().unwrap();
        let a = parent.map_zeroed(VirtualPageNumber::new(0x400)).unwrap();
        parent.map_zeroed(VirtualPageNumber::new(0x401)).unwrap();
        // Free slot 1 so that slots are not simply dense.
        assert_eq!(parent.table.unmap(VirtualPageNumber::new(0x400), &cm), Some(a));

        let child = parent.try_clone().unwrap();
        assert_ne!(child.id(), parent.id());
        assert_eq!(child.stack_base(), parent.stack_base());
        assert_eq!(child.heap(), parent.heap());
        assert_eq!(slots(&child), slots(&parent));
        assert_eq!(cm.free_frames(), 6 - 4);

        for (_, e) in child.page_table().entries() {
            let frame = e.frame().unwrap();
            assert_eq!(cm.owner_of(frame).map(|o| o.space), Some(child.id()));
        }
    }

    #[test]
    fn copy_carries_valid_region_flag() {
        let cm = coremap(4);
        let mut parent = AddressSpace::create(&cm).unwrap();
        let frame = cm
            .allocate_page(FrameOwner {
                space: parent.id(),
                page: VirtualPageNumber::new(0x10),
            })
            .unwrap();
        let outside = PageTableEntry::mapping(VirtualPageNumber::new(0x10), frame)
            .with_in_valid_region(false);
        parent.table.map_at(3, outside);
        parent.map_zeroed(VirtualPageNumber::new(0x11)).unwrap();

        let child = parent.try_clone().unwrap();
        let flags = |s: &AddressSpace<'_, RamMapper>| -> Vec<(usize, bool)> {
            s.page_table()
                .entries()
                .map(|(slot, e)| (slot, e.in_valid_region()))
                .collect()
        };
        assert_eq!(flags(&child), flags(&parent));
        assert_eq!(flags(&child), [(0, true), (3, false)]);
    }

    #[test]
    fn failed_copy_releases_everything() {
        let cm = coremap(3);
        let mut parent = AddressSpace::create(&cm).unwrap();
        for page in 1..=2 {
            parent.map_zeroed(VirtualPageNumber::new(page)).unwrap();
        }
        assert_eq!(parent.try_clone().err(), Some(VmError::OutOfMemory));
        assert_eq!(cm.free_frames(), 1);
        assert_eq!(parent.page_table().present_count(), 2);
    }
}
