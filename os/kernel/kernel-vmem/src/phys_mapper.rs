//! # Physical frame access
//!
//! The kernel can only dereference virtual addresses. [`PhysMapper`] turns a
//! physical frame into a page-sized byte array the kernel can touch, which is
//! what zero-filling and fork-time page copies need.
//!
//! - [`Kseg0Mapper`]: the direct-mapped kernel segment, where physical
//!   address `pa` lives at `MIPS_KSEG0 + pa`. Only meaningful on the target.
//! - [`RamMapper`]: a heap buffer standing in for RAM, for running the memory
//!   manager on the host.

use crate::addresses::{PAGE_BYTES, PhysicalAddress, VirtualAddress};
use alloc::boxed::Box;
use alloc::vec;
use core::ptr::{self, NonNull};
use kernel_info::boot::PhysicalMemory;
use kernel_info::memory::MIPS_KSEG0;

/// One frame's worth of bytes.
pub type FrameBytes = [u8; PAGE_BYTES];

/// Converts a physical frame address into a kernel-usable reference.
pub trait PhysMapper {
    /// Borrow the frame starting at `pa`.
    ///
    /// # Safety
    /// - `pa` must be page aligned and inside the RAM this mapper covers.
    /// - The caller must have exclusive use of that frame for `'a`; no other
    ///   reference to the same frame may be alive.
    unsafe fn phys_to_mut<'a>(&self, pa: PhysicalAddress) -> &'a mut FrameBytes;
}

/// [`PhysMapper`] for the cached, direct-mapped kernel segment.
#[derive(Copy, Clone, Debug, Default)]
pub struct Kseg0Mapper;

impl Kseg0Mapper {
    /// Kernel virtual address of physical address `pa`.
    #[inline]
    #[must_use]
    pub const fn kvaddr(pa: PhysicalAddress) -> VirtualAddress {
        VirtualAddress::new(MIPS_KSEG0 + pa.as_u32())
    }
}

impl PhysMapper for Kseg0Mapper {
    unsafe fn phys_to_mut<'a>(&self, pa: PhysicalAddress) -> &'a mut FrameBytes {
        let va = Self::kvaddr(pa).as_u32() as usize as *mut FrameBytes;
        // SAFETY: KSEG0 maps all of RAM; exclusivity is the caller's contract.
        unsafe { &mut *va }
    }
}

/// [`PhysMapper`] backed by a zero-initialized heap buffer covering a
/// [`PhysicalMemory`] range.
pub struct RamMapper {
    base: NonNull<u8>,
    first: u32,
    len: usize,
}

// Safety: the buffer is owned by the mapper and only reached through
// `phys_to_mut`, whose callers guarantee per-frame exclusivity.
unsafe impl Send for RamMapper {}
unsafe impl Sync for RamMapper {}

impl RamMapper {
    #[must_use]
    pub fn new(memory: PhysicalMemory) -> Self {
        let len = memory.frame_count() * PAGE_BYTES;
        let buffer: Box<[u8]> = vec![0u8; len].into_boxed_slice();
        let base = NonNull::from(Box::leak(buffer)).cast::<u8>();
        Self {
            base,
            first: memory.first_frame_paddr(),
            len,
        }
    }
}

impl Drop for RamMapper {
    fn drop(&mut self) {
        let slice = ptr::slice_from_raw_parts_mut(self.base.as_ptr(), self.len);
        // SAFETY: `base`/`len` came from `Box::leak` in `new`.
        drop(unsafe { Box::from_raw(slice) });
    }
}

impl PhysMapper for RamMapper {
    unsafe fn phys_to_mut<'a>(&self, pa: PhysicalAddress) -> &'a mut FrameBytes {
        let offset = pa
            .as_u32()
            .checked_sub(self.first)
            .map(|o| o as usize)
            .filter(|o| o + PAGE_BYTES <= self.len);
        let Some(offset) = offset else {
            panic!("physical address {pa} outside simulated RAM");
        };
        // SAFETY: bounds checked above; exclusivity is the caller's contract.
        unsafe { &mut *self.base.as_ptr().add(offset).cast::<FrameBytes>() }
    }
}
