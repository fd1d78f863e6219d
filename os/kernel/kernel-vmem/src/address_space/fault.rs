//! Demand paging and kernel access to user memory.
//!
//! Pages inside a region are backed lazily: the first access to an unmapped
//! page traps, [`AddressSpace::vm_fault`] maps a zero-filled frame and loads
//! the translation into the TLB. [`AddressSpace::copy_in`] and
//! [`AddressSpace::copy_out`] go through the same path page by page.

use super::AddressSpace;
use crate::addresses::{FrameNumber, PAGE_BYTES, VirtualAddress};
use crate::error::VmError;
use crate::phys_mapper::PhysMapper;
use crate::tlb::{self, Tlb};
use kernel_sync::{InterruptControl, IrqGuard};
use log::trace;

/// Cause of a TLB trap.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FaultKind {
    /// Load or fetch from an address with no translation.
    Read,
    /// Store to an address with no translation.
    Write,
    /// Store through a translation without the dirty bit.
    ReadOnly,
}

impl<M: PhysMapper> AddressSpace<'_, M> {
    /// Resolve a TLB trap at `addr`.
    ///
    /// # Errors
    /// [`VmError::BadAddress`] for write-protection faults and for addresses
    /// outside every region; [`VmError::OutOfMemory`] if no frame is left for
    /// a first touch.
    pub fn vm_fault<T, C>(
        &mut self,
        kind: FaultKind,
        addr: VirtualAddress,
        tlb: &mut T,
        irq: &C,
    ) -> Result<(), VmError>
    where
        T: Tlb + ?Sized,
        C: InterruptControl + ?Sized,
    {
        if kind == FaultKind::ReadOnly {
            return Err(VmError::BadAddress(addr));
        }

        let frame = self.page_in(addr)?;
        let pa = self.coremap.paddr(frame);

        let _irq = IrqGuard::new(irq);
        tlb::load(tlb, addr.page(), pa);
        Ok(())
    }

    /// Frame backing `addr`, mapping a zeroed one on first touch.
    fn page_in(&mut self, addr: VirtualAddress) -> Result<FrameNumber, VmError> {
        let page = addr.page();
        if !self.is_valid_page(page) {
            trace!("{}: {addr} is outside every region", self.id);
            return Err(VmError::BadAddress(addr));
        }
        if let Some(frame) = self.table.lookup(page).and_then(|(_, e)| e.frame()) {
            return Ok(frame);
        }
        let frame = self.map_zeroed(page)?;
        trace!("{}: demand-mapped {page} to {frame}", self.id);
        Ok(frame)
    }

    /// Copy `bytes` into user memory at `dst`.
    ///
    /// # Errors
    /// [`VmError::BadAddress`] if any byte falls outside the regions;
    /// [`VmError::OutOfMemory`] if a page cannot be backed. Pages before the
    /// failing one keep what was written.
    pub fn copy_out(&mut self, dst: VirtualAddress, bytes: &[u8]) -> Result<(), VmError> {
        self.for_each_chunk(dst, bytes.len(), |space, frame, range, done| {
            let chunk = &bytes[done..done + range.len()];
            space
                .coremap
                .with_frame_mut(frame, |page| page[range].copy_from_slice(chunk));
        })
    }

    /// Fill `buf` from user memory at `src`.
    ///
    /// # Errors
    /// As [`copy_out`](Self::copy_out).
    pub fn copy_in(&mut self, src: VirtualAddress, buf: &mut [u8]) -> Result<(), VmError> {
        self.for_each_chunk(src, buf.len(), |space, frame, range, done| {
            let chunk = &mut buf[done..done + range.len()];
            space
                .coremap
                .with_frame(frame, |page| chunk.copy_from_slice(&page[range]));
        })
    }

    /// Walk `[start, start + len)` page by page, handing `f` the backing
    /// frame, the byte range within it and the bytes already processed.
    fn for_each_chunk(
        &mut self,
        start: VirtualAddress,
        len: usize,
        mut f: impl FnMut(&Self, FrameNumber, core::ops::Range<usize>, usize),
    ) -> Result<(), VmError> {
        let mut done = 0;
        while done < len {
            let va = u32::try_from(done)
                .ok()
                .and_then(|d| start.checked_add(d))
                .ok_or(VmError::BadAddress(start))?;
            let frame = self.page_in(va)?;
            let offset = va.offset() as usize;
            let n = (PAGE_BYTES - offset).min(len - done);
            f(self, frame, offset..offset + n, done);
            done += n;
        }
        Ok(())
    }
}
