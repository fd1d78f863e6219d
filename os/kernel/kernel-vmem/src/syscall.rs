//! # System-call adapters
//!
//! Thin wrappers that turn address-space operations into what a user
//! process sees: a return value, or `-1` with an error number.

use crate::address_space::AddressSpace;
use crate::addresses::{VirtualAddress, VirtualPageNumber};
use crate::error::Errno;
use crate::phys_mapper::PhysMapper;
use crate::tlb::{self, Tlb};
use kernel_sync::{InterruptControl, IrqGuard};
use log::trace;

/// Outcome of a system call before it is written to the trap frame.
pub type SyscallResult = Result<VirtualAddress, Errno>;

/// `sbrk(change)`: move the break by `change` bytes and return the break as
/// it was before the call.
///
/// Translations for pages released by a shrink are dropped from the TLB.
///
/// # Errors
/// [`Errno::Inval`] when shrinking below the heap base, [`Errno::NoMem`] when
/// growing past the stack or the heap limit, or before a data region exists.
pub fn sys_sbrk<M, T, C>(
    space: &mut AddressSpace<'_, M>,
    change: i32,
    tlb: &mut T,
    irq: &C,
) -> SyscallResult
where
    M: PhysMapper,
    T: Tlb + ?Sized,
    C: InterruptControl + ?Sized,
{
    let old = space.heap().top;
    let new = space.grow_heap(change)?;
    trace!("{}: sbrk({change}) = {old}", space.id());

    if new < old {
        let first = VirtualPageNumber::containing_end(new).as_u32();
        let end = VirtualPageNumber::containing_end(old).as_u32();
        let _irq = IrqGuard::new(irq);
        for vpn in first..end {
            tlb::invalidate_page(tlb, VirtualPageNumber::new(vpn));
        }
    }
    Ok(old)
}

/// Encode a result as the `(v0, errno)` register pair: the value and `0` on
/// success, `-1` and the error number on failure.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub const fn to_registers(result: SyscallResult) -> (i32, i32) {
    match result {
        Ok(va) => (va.as_u32() as i32, 0),
        Err(e) => (-1, e.code()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_space::{FaultKind, RegionFlags};
    use crate::coremap::Coremap;
    use crate::phys_mapper::RamMapper;
    use crate::tlb::SoftTlb;
    use kernel_info::boot::PhysicalMemory;
    use kernel_sync::SoftInterrupts;

    fn coremap(frames: u32) -> Coremap<RamMapper> {
        let mem = PhysicalMemory::with_frames(0x0080_0000, frames);
        Coremap::new(mem, RamMapper::new(mem)).unwrap()
    }

    fn process(cm: &Coremap<RamMapper>) -> AddressSpace<'_, RamMapper> {
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
    fn sbrk_returns_previous_break() {
        let cm = coremap(2);
        let mut space = process(&cm);
        let mut tlb = SoftTlb::new();
        let irq = SoftInterrupts::default();

        assert_eq!(sys_sbrk(&mut space, 0, &mut tlb, &irq).unwrap().as_u32(), 0x0040_3000);
        assert_eq!(sys_sbrk(&mut space, 64, &mut tlb, &irq).unwrap().as_u32(), 0x0040_3000);
        assert_eq!(sys_sbrk(&mut space, -64, &mut tlb, &irq).unwrap().as_u32(), 0x0040_3040);
        assert_eq!(space.heap().top.as_u32(), 0x0040_3000);
    }

    #[test]
    fn sbrk_errors_map_to_errno() {
        let cm = coremap(2);
        let mut space = process(&cm);
        let mut tlb = SoftTlb::new();
        let irq = SoftInterrupts::default();

        let r = sys_sbrk(&mut space, -1, &mut tlb, &irq);
        assert_eq!(r, Err(Errno::Inval));
        assert_eq!(to_registers(r), (-1, Errno::Inval.code()));
        let r = sys_sbrk(&mut space, i32::MAX, &mut tlb, &irq);
        assert_eq!(r, Err(Errno::NoMem));
        assert_eq!(to_registers(Ok(VirtualAddress::new(0x0040_3000))), (0x0040_3000, 0));
    }

    #[test]
    fn shrink_drops_stale_translations() {
        let cm = coremap(4);
        let mut space = process(&cm);
        let mut tlb = SoftTlb::new();
        let irq = SoftInterrupts::default();

        sys_sbrk(&mut space, 8192, &mut tlb, &irq).unwrap();
        for addr in [0x0040_3000, 0x0040_4000] {
            space
                .vm_fault(FaultKind::Write, VirtualAddress::new(addr), &mut tlb, &irq)
                .unwrap();
        }
        assert_eq!(tlb.valid_count(), 2);

        sys_sbrk(&mut space, -4096, &mut tlb, &irq).unwrap();
        assert_eq!(tlb.valid_count(), 1);
        assert_eq!(cm.free_frames(), 3);
        assert!(irq.enabled());
    }
}
