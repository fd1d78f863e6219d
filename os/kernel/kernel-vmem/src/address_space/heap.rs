//! Moving the program break.

use super::AddressSpace;
use crate::addresses::{VirtualAddress, VirtualPageNumber};
use crate::error::VmError;
use crate::phys_mapper::PhysMapper;
use kernel_info::memory::{HEAP_LIMIT, STACK_FLOOR};
use log::{debug, warn};

impl<M: PhysMapper> AddressSpace<'_, M> {
    /// Highest address the heap top may reach.
    #[must_use]
    pub fn heap_ceiling(&self) -> VirtualAddress {
        if self.stack_base.is_zero() {
            VirtualAddress::new(STACK_FLOOR)
        } else {
            self.stack_base
        }
    }

    /// Move the heap top by `delta` bytes and return the new top.
    ///
    /// Growing only moves the top; pages are mapped when first touched.
    /// Shrinking releases every mapped page that lies wholly above the new
    /// top. Stale translations for those pages are the caller's to drop.
    ///
    /// # Errors
    /// - [`VmError::InvalidArgument`] when shrinking below the heap base.
    /// - [`VmError::OutOfAddressSpace`] when growing into the stack, or
    ///   growing before a data region exists (there is no heap to grow).
    /// - [`VmError::ResourceLimit`] when the heap would exceed its limit.
    pub fn grow_heap(&mut self, delta: i32) -> Result<VirtualAddress, VmError> {
        if delta == 0 {
            return Ok(self.heap.top);
        }

        let base = i64::from(self.heap.base.as_u32());
        let old_top = self.heap.top;
        let new_top = i64::from(old_top.as_u32()) + i64::from(delta);

        if delta > 0 {
            if self.data.is_none() {
                warn!("{}: heap growth before the data region exists", self.id);
                return Err(VmError::OutOfAddressSpace);
            }
            if new_top > i64::from(self.heap_ceiling().as_u32()) {
                warn!("{}: heap top {new_top:#x} would reach the stack", self.id);
                return Err(VmError::OutOfAddressSpace);
            }
            if new_top - base > i64::from(HEAP_LIMIT) {
                warn!("{}: heap of {} bytes exceeds its limit", self.id, new_top - base);
                return Err(VmError::ResourceLimit);
            }
        } else if new_top < base {
            return Err(VmError::InvalidArgument);
        }

        let new_top =
            VirtualAddress::new(u32::try_from(new_top).map_err(|_| VmError::InvalidArgument)?);
        self.heap.top = new_top;

        if new_top < old_top {
            let released = self.table.unmap_range(
                VirtualPageNumber::containing_end(new_top)..VirtualPageNumber::containing_end(old_top),
                self.coremap,
            );
            debug!("{}: heap top {old_top} -> {new_top}, released {released} page(s)", self.id);
        } else {
            debug!("{}: heap top {old_top} -> {new_top}", self.id);
        }
        Ok(new_top)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_space::RegionFlags;
    use crate::address_space::tests::coremap;
    use crate::coremap::Coremap;
    use crate::phys_mapper::RamMapper;

    fn with_data(cm: &Coremap<RamMapper>) -> AddressSpace<'_, RamMapper> {
        let mut space = AddressSpace::create(cm).unwrap();
        space
            .define_region(VirtualAddress::new(0x0040_0000), 4096, RegionFlags::READ)
            .unwrap();
        space
            .define_region(VirtualAddress::new(0x0040_1000), 8192, RegionFlags::all())
            .unwrap();
        space
    }

    #[test]
    fn zero_delta_returns_top() {
        let cm = coremap(1);
        let mut space = AddressSpace::create(&cm).unwrap();
        assert_eq!(space.grow_heap(0), Ok(VirtualAddress::zero()));
        let mut space = with_data(&cm);
        assert_eq!(space.grow_heap(0).unwrap().as_u32(), 0x0040_3000);
    }

    #[test]
    fn grow_moves_top_without_mapping() {
        let cm = coremap(2);
        let mut space = with_data(&cm);
        assert_eq!(space.grow_heap(8192).unwrap().as_u32(), 0x0040_5000);
        assert_eq!(space.heap().top.as_u32(), 0x0040_5000);
        assert_eq!(space.page_table().present_count(), 0);
    }

    #[test]
    fn grow_before_data_is_out_of_memory() {
        let cm = coremap(1);
        let mut space = AddressSpace::create(&cm).unwrap();
        assert_eq!(space.grow_heap(4096), Err(VmError::OutOfAddressSpace));
        assert_eq!(space.grow_heap(4096).map_err(VmError::errno), Err(crate::error::Errno::NoMem));
        assert_eq!(space.heap().top, VirtualAddress::zero());
    }

    #[test]
    fn shrink_below_base_is_invalid() {
        let cm = coremap(1);
        let mut space = with_data(&cm);
        space.grow_heap(100).unwrap();
        assert_eq!(space.grow_heap(-101), Err(VmError::InvalidArgument));
        assert_eq!(space.heap().top.as_u32(), 0x0040_3000 + 100);
    }

    #[test]
    fn limit_and_stack_are_enforced() {
        let cm = coremap(1);
        let mut space = with_data(&cm);
        let limit = i32::try_from(HEAP_LIMIT).unwrap();
        assert_eq!(space.grow_heap(limit + 1), Err(VmError::ResourceLimit));
        assert_eq!(space.grow_heap(limit).unwrap().as_u32(), 0x0040_3000 + HEAP_LIMIT);

        let mut space = with_data(&cm);
        let to_stack = i32::try_from(STACK_FLOOR - 0x0040_3000).unwrap();
        assert_eq!(space.grow_heap(to_stack + 1), Err(VmError::OutOfAddressSpace));
        assert_eq!(space.heap().top.as_u32(), 0x0040_3000);
    }

    #[test]
    fn shrink_releases_pages_above_new_top() {
        let cm = coremap(4);
        let mut space = with_data(&cm);
        space.grow_heap(3 * 4096).unwrap();
        for page in 0x403..0x406 {
            space.map_zeroed(VirtualPageNumber::new(page)).unwrap();
        }
        assert_eq!(cm.free_frames(), 1);

        // Page 0x404 still holds live heap bytes below the new top.
        space.grow_heap(-(4096 + 2048)).unwrap();
        assert_eq!(space.heap().top.as_u32(), 0x0040_4800);
        assert_eq!(cm.free_frames(), 2);
        assert!(space.page_table().lookup(VirtualPageNumber::new(0x404)).is_some());
        assert!(space.page_table().lookup(VirtualPageNumber::new(0x405)).is_none());

        space.grow_heap(-2048 - 4096).unwrap();
        assert_eq!(space.heap().top, space.heap().base);
        assert_eq!(cm.free_frames(), 4);
    }
}
