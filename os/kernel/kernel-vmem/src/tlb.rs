//! # Software-managed translation cache
//!
//! The MMU only knows the translations currently loaded into its TLB; on a
//! miss it traps and the kernel refills a slot from the page table. The
//! [`Tlb`] trait is the narrow interface the memory manager needs for that,
//! with [`SoftTlb`] as an in-memory model.
//!
//! ```text
//!  EntryHi  31               12 11     6 5     0
//!          +-------------------+--------+-------+
//!          |        VPN        |  ASID  |   0   |
//!          +-------------------+--------+-------+
//!
//!  EntryLo  31               12 11 10  9  8 7   0
//!          +-------------------+--+--+--+--+-----+
//!          |        PFN        |N |D |V |G |  0  |
//!          +-------------------+--+--+--+--+-----+
//! ```
//!
//! An unused slot holds a distinct kernel-segment VPN per slot (so no two
//! slots ever match the same address) and an all-zero `EntryLo`.

use crate::addresses::{PhysicalAddress, VirtualPageNumber};
use bitfield_struct::bitfield;
use kernel_info::memory::{MIPS_KSEG0, NUM_TLB, PAGE_SHIFT};
use log::trace;

/// High word of a TLB entry: the virtual side.
#[bitfield(u32)]
#[derive(Eq, PartialEq)]
pub struct EntryHi {
    #[bits(6)]
    __reserved: u8,
    #[bits(6)]
    pub asid: u8,
    #[bits(20)]
    pub vpn: u32,
}

/// Low word of a TLB entry: the physical side and permissions.
#[bitfield(u32)]
#[derive(Eq, PartialEq)]
pub struct EntryLo {
    #[bits(8)]
    __reserved: u8,
    pub global: bool,
    pub valid: bool,
    /// Writes allowed.
    pub dirty: bool,
    pub no_cache: bool,
    /// Absolute physical page number.
    #[bits(20)]
    pub pfn: u32,
}

impl EntryHi {
    /// Placeholder for unused slot `slot`; never matches a user address.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn invalid(slot: usize) -> Self {
        Self::new().with_vpn((MIPS_KSEG0 >> PAGE_SHIFT) + slot as u32)
    }

    #[inline]
    #[must_use]
    pub const fn for_page(page: VirtualPageNumber) -> Self {
        Self::new().with_vpn(page.as_u32())
    }
}

impl EntryLo {
    pub const INVALID: Self = Self::new();

    /// A valid, writable translation to the frame at `pa`.
    #[inline]
    #[must_use]
    pub const fn writable(pa: PhysicalAddress) -> Self {
        Self::new()
            .with_pfn(pa.page_number())
            .with_valid(true)
            .with_dirty(true)
    }
}

/// Access to the MMU's translation slots.
pub trait Tlb {
    /// Number of slots.
    fn capacity(&self) -> usize;

    /// Contents of `slot`.
    fn read(&self, slot: usize) -> (EntryHi, EntryLo);

    /// Overwrite `slot`.
    fn write(&mut self, slot: usize, hi: EntryHi, lo: EntryLo);

    /// Overwrite a slot of the hardware's choosing. Returns the slot used.
    fn write_random(&mut self, hi: EntryHi, lo: EntryLo) -> usize;

    /// Slot whose virtual side matches `hi`, if any.
    fn probe(&self, hi: EntryHi) -> Option<usize>;
}

/// In-memory [`Tlb`] with round-robin replacement.
#[derive(Debug, Clone)]
pub struct SoftTlb {
    slots: [(EntryHi, EntryLo); NUM_TLB],
    victim: usize,
}

impl SoftTlb {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|i| (EntryHi::invalid(i), EntryLo::INVALID)),
            victim: 0,
        }
    }

    /// Number of slots currently holding a valid translation.
    #[must_use]
    pub fn valid_count(&self) -> usize {
        self.slots.iter().filter(|(_, lo)| lo.valid()).count()
    }
}

impl Default for SoftTlb {
    fn default() -> Self {
        Self::new()
    }
}

impl Tlb for SoftTlb {
    fn capacity(&self) -> usize {
        NUM_TLB
    }

    fn read(&self, slot: usize) -> (EntryHi, EntryLo) {
        self.slots[slot]
    }

    fn write(&mut self, slot: usize, hi: EntryHi, lo: EntryLo) {
        self.slots[slot] = (hi, lo);
    }

    fn write_random(&mut self, hi: EntryHi, lo: EntryLo) -> usize {
        let slot = self.victim;
        self.victim = (self.victim + 1) % NUM_TLB;
        self.slots[slot] = (hi, lo);
        slot
    }

    fn probe(&self, hi: EntryHi) -> Option<usize> {
        self.slots.iter().position(|(h, _)| h.vpn() == hi.vpn())
    }
}

/// Reset every slot to its invalid placeholder.
pub fn invalidate_all<T: Tlb + ?Sized>(tlb: &mut T) {
    for slot in 0..tlb.capacity() {
        tlb.write(slot, EntryHi::invalid(slot), EntryLo::INVALID);
    }
}

/// Drop the translation for `page`, if loaded. Returns whether one was.
pub fn invalidate_page<T: Tlb + ?Sized>(tlb: &mut T, page: VirtualPageNumber) -> bool {
    match tlb.probe(EntryHi::for_page(page)) {
        Some(slot) => {
            tlb.write(slot, EntryHi::invalid(slot), EntryLo::INVALID);
            trace!("tlb: dropped {page} from slot {slot}");
            true
        }
        None => false,
    }
}

/// Install `page -> pa`, reusing a matching slot, then a free one, then a
/// random victim. Returns the slot written.
pub fn load<T: Tlb + ?Sized>(tlb: &mut T, page: VirtualPageNumber, pa: PhysicalAddress) -> usize {
    let hi = EntryHi::for_page(page);
    let lo = EntryLo::writable(pa);
    let free = || (0..tlb.capacity()).find(|&slot| !tlb.read(slot).1.valid());
    let slot = match tlb.probe(hi).or_else(free) {
        Some(slot) => {
            tlb.write(slot, hi, lo);
            slot
        }
        None => tlb.write_random(hi, lo),
    };
    trace!("tlb: slot {slot}: {page} -> {pa}");
    slot
}
