//! # Memory Layout

/// Size of one virtual page and of one physical frame, in bytes.
pub const PAGE_SIZE: u32 = 4096;

/// log2 of [`PAGE_SIZE`].
pub const PAGE_SHIFT: u32 = 12;

/// Mask selecting the page-aligned part of an address.
pub const PAGE_FRAME: u32 = !(PAGE_SIZE - 1);

/// End of the user segment; everything at or above belongs to the kernel.
pub const USERTOP: u32 = 0x8000_0000;

/// Initial user stack pointer handed to a new process.
pub const USERSTACK: u32 = USERTOP;

/// Number of pages reserved below [`USERSTACK`] for the user stack.
pub const STACK_PAGES: u32 = 12;

/// Lowest address of the stack reservation. The heap may never grow past it.
pub const STACK_FLOOR: u32 = USERSTACK - STACK_PAGES * PAGE_SIZE;

/// Upper bound on `heap.top - heap.base` for a single process.
pub const HEAP_LIMIT: u32 = 16 * 1024 * 1024;

/// Base of the direct-mapped, cached kernel segment.
///
/// Physical address `pa` is visible to the kernel at `MIPS_KSEG0 + pa`.
pub const MIPS_KSEG0: u32 = 0x8000_0000;

/// Number of slots in the processor's translation lookaside buffer.
pub const NUM_TLB: usize = 64;

/// Each page table holds this many entries per physical frame in the machine.
pub const PAGE_TABLE_ENTRIES_PER_FRAME: usize = 2;

/// Rounds `addr` down to its page base.
#[inline]
#[must_use]
pub const fn page_align_down(addr: u32) -> u32 {
    addr & PAGE_FRAME
}

/// Number of whole pages needed to cover `bytes`.
#[inline]
#[must_use]
pub const fn pages_for(bytes: u64) -> u64 {
    bytes.div_ceil(PAGE_SIZE as u64)
}

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(1 << PAGE_SHIFT == PAGE_SIZE);
    assert!(USERSTACK <= USERTOP);
    assert!(STACK_FLOOR.is_multiple_of(PAGE_SIZE));
    assert!(HEAP_LIMIT.is_multiple_of(PAGE_SIZE));
    assert!(HEAP_LIMIT < STACK_FLOOR);
};
