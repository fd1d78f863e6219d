//! Region definition and the executable-load protocol.

use super::{AddressSpace, Region};
use crate::addresses::{VirtualAddress, VirtualPageNumber};
use crate::error::VmError;
use crate::phys_mapper::PhysMapper;
use kernel_info::memory::{PAGE_SIZE, STACK_FLOOR, USERSTACK, pages_for};
use log::{debug, warn};

bitflags::bitflags! {
    /// Access a segment was declared with. Recorded only; every mapped page
    /// is readable and writable.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RegionFlags: u8 {
        const READ    = 1 << 0;
        const WRITE   = 1 << 1;
        const EXECUTE = 1 << 2;
    }
}

impl RegionFlags {
    #[must_use]
    pub fn from_permissions(readable: bool, writable: bool, executable: bool) -> Self {
        let mut flags = Self::empty();
        flags.set(Self::READ, readable);
        flags.set(Self::WRITE, writable);
        flags.set(Self::EXECUTE, executable);
        flags
    }
}

/// Page holding the initial stack pointer.
const TOP_STACK_PAGE: VirtualPageNumber = VirtualPageNumber::new((USERSTACK / PAGE_SIZE) - 1);

impl<M: PhysMapper> AddressSpace<'_, M> {
    /// Declare a segment of `size` bytes at `vaddr`. The first call defines
    /// text, the second defines data and places the heap right after it.
    ///
    /// The region keeps `size` as given; its page count also covers the
    /// in-page offset of `vaddr`.
    ///
    /// # Errors
    /// - [`VmError::TooManyRegions`] on a third call; nothing changes.
    /// - [`VmError::InvalidArgument`] if the segment's last page would lie
    ///   at or above [`STACK_FLOOR`], i.e. inside the stack reservation.
    ///   Nothing changes.
    pub fn define_region(
        &mut self,
        vaddr: VirtualAddress,
        size: u32,
        flags: RegionFlags,
    ) -> Result<(), VmError> {
        if self.text.is_some() && self.data.is_some() {
            warn!("{}: rejecting region at {vaddr}: text and data already defined", self.id);
            return Err(VmError::TooManyRegions);
        }

        let spanned = u64::from(size) + u64::from(vaddr.offset());
        let base = vaddr.align_down();
        let pages = pages_for(spanned);
        let end = u64::from(base.as_u32()) + pages * u64::from(PAGE_SIZE);
        if end > u64::from(STACK_FLOOR) {
            warn!("{}: region at {vaddr} ({size} bytes) overlaps the stack", self.id);
            return Err(VmError::InvalidArgument);
        }

        let region = Region {
            base,
            pages: u32::try_from(pages).map_err(|_| VmError::InvalidArgument)?,
            size,
            flags,
        };

        if self.text.is_none() {
            self.text = Some(region);
            debug!("{}: text {region:?}", self.id);
        } else {
            let end = region.end();
            self.data = Some(region);
            self.heap.base = end;
            self.heap.top = end;
            debug!("{}: data {region:?}, heap at {end}", self.id);
        }
        Ok(())
    }

    /// Start loading an executable: establish the stack reservation and map
    /// its topmost page.
    ///
    /// # Errors
    /// [`VmError::OutOfMemory`] if the stack page cannot be mapped; the space
    /// is left as it was.
    pub fn prepare_load(&mut self) -> Result<(), VmError> {
        let previous = self.stack_base;
        self.stack_base = VirtualAddress::new(STACK_FLOOR);
        if self.table.lookup(TOP_STACK_PAGE).is_none()
            && let Err(e) = self.map_zeroed(TOP_STACK_PAGE)
        {
            self.stack_base = previous;
            warn!("{}: no frame for the initial stack page", self.id);
            return Err(e);
        }
        self.loading = true;
        debug!("{}: loading, stack at {}", self.id, self.stack_base);
        Ok(())
    }

    /// Finish loading an executable.
    pub fn complete_load(&mut self) {
        self.loading = false;
        debug!("{}: load complete", self.id);
    }

    /// Initial user stack pointer.
    ///
    /// # Panics
    /// If the top stack page is not mapped, i.e. `prepare_load` never ran.
    #[must_use]
    pub fn define_stack(&self) -> VirtualAddress {
        assert!(
            self.table.lookup(TOP_STACK_PAGE).is_some(),
            "{}: initial stack page {TOP_STACK_PAGE} is not mapped",
            self.id
        );
        VirtualAddress::new(USERSTACK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_space::Heap;
    use crate::address_space::tests::coremap;

    const RX: RegionFlags = RegionFlags::READ.union(RegionFlags::EXECUTE);
    const RW: RegionFlags = RegionFlags::READ.union(RegionFlags::WRITE);

    #[test]
    fn flags_from_permissions() {
        assert_eq!(RegionFlags::from_permissions(true, false, true), RX);
        assert_eq!(RegionFlags::from_permissions(false, false, false), RegionFlags::empty());
    }

    #[test]
    fn text_then_data_then_heap() {
        let cm = coremap(4);
        let mut space = AddressSpace::create(&cm).unwrap();
        space.define_region(VirtualAddress::new(0x0040_0000), 4096, RX).unwrap();
        space.define_region(VirtualAddress::new(0x0040_1000), 8192, RW).unwrap();

        let text = space.text().unwrap();
        assert_eq!((text.base.as_u32(), text.pages, text.flags), (0x0040_0000, 1, RX));
        let data = space.data().unwrap();
        assert_eq!((data.base.as_u32(), data.pages), (0x0040_1000, 2));
        let heap = space.heap();
        assert_eq!(heap.base.as_u32(), 0x0040_3000);
        assert_eq!(heap.top, heap.base);
        // Defining regions maps nothing.
        assert_eq!(cm.free_frames(), 4);
    }

    #[test]
    fn unaligned_start_keeps_size_and_spans_pages() {
        let cm = coremap(1);
        let mut space = AddressSpace::create(&cm).unwrap();
        space.define_region(VirtualAddress::new(0x0040_0FF0), 0x20, RX).unwrap();
        let text = space.text().unwrap();
        assert_eq!(text.base.as_u32(), 0x0040_0000);
        assert_eq!(text.size, 0x20);
        assert_eq!(text.pages, 2);
        assert_eq!(text.end().as_u32(), 0x0040_2000);
    }

    #[test]
    fn third_region_is_rejected() {
        let cm = coremap(1);
        let mut space = AddressSpace::create(&cm).unwrap();
        space.define_region(VirtualAddress::new(0x1000), 10, RX).unwrap();
        space.define_region(VirtualAddress::new(0x2000), 10, RW).unwrap();
        let before = (space.text(), space.data(), space.heap());
        assert_eq!(
            space.define_region(VirtualAddress::new(0x3000), 10, RW),
            Err(VmError::TooManyRegions)
        );
        assert_eq!((space.text(), space.data(), space.heap()), before);
    }

    #[test]
    fn region_into_stack_is_rejected() {
        let cm = coremap(1);
        let mut space = AddressSpace::create(&cm).unwrap();
        assert_eq!(
            space.define_region(VirtualAddress::new(STACK_FLOOR - 0x1000), 0x1001, RW),
            Err(VmError::InvalidArgument)
        );
        assert_eq!(space.text(), None);
        assert_eq!(space.heap(), Heap::default());
    }

    #[test]
    fn load_protocol_maps_top_stack_page() {
        let cm = coremap(2);
        let mut space = AddressSpace::create(&cm).unwrap();
        space.prepare_load().unwrap();
        assert!(space.is_loading());
        assert_eq!(space.stack_base().as_u32(), STACK_FLOOR);
        assert_eq!(space.page_table().present_count(), 1);
        space.complete_load();
        assert!(!space.is_loading());
        assert_eq!(space.define_stack().as_u32(), USERSTACK);
        // Preparing again reuses the mapped page.
        space.prepare_load().unwrap();
        assert_eq!(cm.free_frames(), 1);
    }

    #[test]
    fn prepare_load_without_memory_changes_nothing() {
        let cm = coremap(1);
        let mut hog = AddressSpace::create(&cm).unwrap();
        hog.prepare_load().unwrap();

        let mut space = AddressSpace::create(&cm).unwrap();
        assert_eq!(space.prepare_load(), Err(VmError::OutOfMemory));
        assert!(space.stack_base().is_zero());
        assert!(!space.is_loading());
        assert_eq!(space.page_table().present_count(), 0);
    }

    #[test]
    #[should_panic(expected = "is not mapped")]
    fn define_stack_requires_prepared_stack() {
        let cm = coremap(1);
        let space = AddressSpace::create(&cm).unwrap();
        let _ = space.define_stack();
    }
}
