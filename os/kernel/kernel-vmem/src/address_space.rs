//! # Per-process address space
//!
//! An [`AddressSpace`] owns one flat [`PageTable`] plus the descriptors of
//! the regions a user program may touch:
//!
//! ```text
//!  0x0000_0000 ┌──────────────┐
//!              │     text     │  first define_region
//!              ├──────────────┤
//!              │     data     │  second define_region
//!              ├──────────────┤  heap.base
//!              │     heap     │  grows with sbrk
//!              ├ ─ ─ ─ ─ ─ ─ ─┤  heap.top
//!              │              │
//!              ├──────────────┤  stack base (STACK_FLOOR)
//!              │    stack     │
//!  USERSTACK   └──────────────┘
//! ```
//!
//! Frames are only ever referenced from here. Dropping a space releases
//! every frame it maps, which also serves as the rollback path for a
//! half-built copy.
//!
//! Operations live in submodules by concern:
//! - [`regions`]: text/data/stack definition and the load protocol,
//! - [`heap`]: moving the break,
//! - [`fork`]: deep copy,
//! - [`fault`]: demand paging and kernel access to user memory.

mod fault;
mod fork;
mod heap;
mod regions;

pub use fault::FaultKind;
pub use regions::RegionFlags;

use crate::addresses::{FrameNumber, PhysicalAddress, VirtualAddress, VirtualPageNumber};
use crate::coremap::{Coremap, FrameOwner};
use crate::error::VmError;
use crate::page_table::PageTable;
use crate::phys_mapper::PhysMapper;
use crate::tlb::{self, Tlb};
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};
use kernel_info::memory::{PAGE_SIZE, PAGE_TABLE_ENTRIES_PER_FRAME, USERSTACK};
use kernel_sync::{InterruptControl, IrqGuard};
use log::{debug, trace};

/// Process-unique tag of an address space, used in frame ownership records.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct AddressSpaceId(u32);

static NEXT_ID: AtomicU32 = AtomicU32::new(1);

impl AddressSpaceId {
    /// A fresh id, never handed out before.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for AddressSpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "as#{}", self.0)
    }
}

impl fmt::Display for AddressSpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A loaded segment: page-aligned base and whole pages.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Region {
    pub base: VirtualAddress,
    pub pages: u32,
    /// Size in bytes as requested, before aligning the start down.
    pub size: u32,
    pub flags: RegionFlags,
}

impl Region {
    /// First address past the last page.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        VirtualAddress::new(self.base.as_u32() + self.pages * PAGE_SIZE)
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, page: VirtualPageNumber) -> bool {
        let first = self.base.page().as_u32();
        page.as_u32() >= first && page.as_u32() < first + self.pages
    }
}

/// The program break: `[base, top)` is usable heap.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Heap {
    pub base: VirtualAddress,
    pub top: VirtualAddress,
}

/// One process's view of memory.
pub struct AddressSpace<'c, M: PhysMapper> {
    id: AddressSpaceId,
    coremap: &'c Coremap<M>,
    table: PageTable,
    text: Option<Region>,
    data: Option<Region>,
    heap: Heap,
    stack_base: VirtualAddress,
    loading: bool,
}

impl<'c, M: PhysMapper> AddressSpace<'c, M> {
    /// An empty address space: no regions, no mappings.
    ///
    /// # Errors
    /// [`VmError::OutOfMemory`] if the page table cannot be allocated.
    pub fn create(coremap: &'c Coremap<M>) -> Result<Self, VmError> {
        let table = PageTable::new(PAGE_TABLE_ENTRIES_PER_FRAME * coremap.frame_count())?;
        let id = AddressSpaceId::next();
        debug!("{id}: created with {} page-table slots", table.capacity());
        Ok(Self {
            id,
            coremap,
            table,
            text: None,
            data: None,
            heap: Heap::default(),
            stack_base: VirtualAddress::zero(),
            loading: false,
        })
    }

    /// Tear the space down, releasing every frame it maps.
    pub fn destroy(self) {
        drop(self);
    }

    #[inline]
    #[must_use]
    pub const fn id(&self) -> AddressSpaceId {
        self.id
    }

    #[inline]
    #[must_use]
    pub const fn coremap(&self) -> &'c Coremap<M> {
        self.coremap
    }

    #[inline]
    #[must_use]
    pub const fn page_table(&self) -> &PageTable {
        &self.table
    }

    #[inline]
    #[must_use]
    pub const fn text(&self) -> Option<Region> {
        self.text
    }

    #[inline]
    #[must_use]
    pub const fn data(&self) -> Option<Region> {
        self.data
    }

    #[inline]
    #[must_use]
    pub const fn heap(&self) -> Heap {
        self.heap
    }

    /// Lowest stack address, zero until the stack is established.
    #[inline]
    #[must_use]
    pub const fn stack_base(&self) -> VirtualAddress {
        self.stack_base
    }

    /// Between `prepare_load` and `complete_load`.
    #[inline]
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.loading
    }

    /// Make this the current address space: discard every cached translation
    /// with interrupts masked.
    pub fn activate<T, C>(&self, tlb: &mut T, irq: &C)
    where
        T: Tlb + ?Sized,
        C: InterruptControl + ?Sized,
    {
        let _irq = IrqGuard::new(irq);
        tlb::invalidate_all(tlb);
        trace!("{}: activated", self.id);
    }

    /// Physical address backing `va`, if its page is mapped.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let (_, entry) = self.table.lookup(va.page())?;
        let frame = entry.frame()?;
        Some(PhysicalAddress::new(
            self.coremap.paddr(frame).as_u32() + va.offset(),
        ))
    }

    /// Whether `page` lies in text, data, the heap or the stack.
    #[must_use]
    pub fn is_valid_page(&self, page: VirtualPageNumber) -> bool {
        let in_region = |r: Option<Region>| r.is_some_and(|r| r.contains(page));
        let in_heap = self.data.is_some()
            && page >= self.heap.base.page()
            && page < VirtualPageNumber::containing_end(self.heap.top);
        let in_stack = !self.stack_base.is_zero()
            && page >= self.stack_base.page()
            && page < VirtualAddress::new(USERSTACK).page();
        in_region(self.text) || in_region(self.data) || in_heap || in_stack
    }

    /// Allocate a zero-filled frame and map `page` to it.
    fn map_zeroed(&mut self, page: VirtualPageNumber) -> Result<FrameNumber, VmError> {
        let owner = FrameOwner {
            space: self.id,
            page,
        };
        let frame = self.coremap.allocate_page(owner)?;
        self.coremap.zero_frame(frame);
        if let Err(e) = self.table.map(page, frame) {
            self.coremap
                .free(frame)
                .unwrap_or_else(|e| panic!("fresh {frame} could not be freed: {e}"));
            return Err(e);
        }
        Ok(frame)
    }
}

impl<M: PhysMapper> Drop for AddressSpace<'_, M> {
    fn drop(&mut self) {
        let released = self.table.clear(self.coremap);
        debug!("{}: destroyed, released {released} frame(s)", self.id);
    }
}

impl<M: PhysMapper> fmt::Debug for AddressSpace<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("id", &self.id)
            .field("text", &self.text)
            .field("data", &self.data)
            .field("heap", &self.heap)
            .field("stack_base", &self.stack_base)
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}
