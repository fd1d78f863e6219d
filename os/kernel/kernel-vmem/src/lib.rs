//! # Virtual Memory Manager
//!
//! Per-process virtual memory for a small teaching kernel on a MIPS-style
//! machine with a 32-bit address space and a software-refilled TLB.
//!
//! ## What you get
//! - A [`Coremap`]: one record per physical frame, first-fit allocation of
//!   single frames and contiguous runs, all behind one spin lock.
//! - A flat [`PageTable`] per process mapping virtual page numbers to frames.
//! - An [`AddressSpace`] combining the table with text/data/heap/stack
//!   descriptors: region definition, `sbrk`-style heap growth, fork-time deep
//!   copy, activation and demand paging.
//! - A [`Tlb`] trait with an in-memory [`SoftTlb`] model.
//! - A [`PhysMapper`] trait to reach frame contents from the kernel.
//!
//! ## Address translation
//!
//! ```text
//! | 31‒12 | 11‒0   |
//! |  VPN  | Offset |
//! ```
//!
//! The MMU only consults its TLB. A miss traps into
//! [`AddressSpace::vm_fault`], which looks the page up in the page table,
//! maps a zero-filled frame on first touch, and loads the translation.
//! Activating a different address space simply discards every TLB entry.
//!
//! ## Example
//!
//! ```
//! use kernel_info::boot::PhysicalMemory;
//! use kernel_vmem::{AddressSpace, Coremap, RamMapper, RegionFlags, VirtualAddress};
//!
//! let ram = PhysicalMemory::with_frames(0x0010_0000, 16);
//! let coremap = Coremap::new(ram, RamMapper::new(ram)).unwrap();
//!
//! let mut space = AddressSpace::create(&coremap).unwrap();
//! space.define_region(VirtualAddress::new(0x0040_0000), 4096, RegionFlags::READ).unwrap();
//! space.define_region(VirtualAddress::new(0x0040_1000), 8192, RegionFlags::all()).unwrap();
//! assert_eq!(space.grow_heap(4096).unwrap().as_u32(), 0x0040_4000);
//!
//! space.copy_out(VirtualAddress::new(0x0040_3000), b"heap").unwrap();
//! assert_eq!(coremap.free_frames(), 15);
//!
//! drop(space);
//! assert_eq!(coremap.free_frames(), 16);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod address_space;
mod addresses;
pub mod coremap;
mod error;
pub mod page_table;
mod phys_mapper;
pub mod syscall;
pub mod tlb;

pub use crate::address_space::{AddressSpace, AddressSpaceId, FaultKind, Heap, Region, RegionFlags};
pub use crate::addresses::{FrameNumber, PAGE_BYTES, PhysicalAddress, VirtualAddress, VirtualPageNumber};
pub use crate::coremap::{Coremap, Frame, FrameOwner};
pub use crate::error::{Errno, VmError};
pub use crate::page_table::{PageTable, PageTableEntry};
pub use crate::phys_mapper::{FrameBytes, Kseg0Mapper, PhysMapper, RamMapper};
pub use crate::syscall::{SyscallResult, sys_sbrk};
pub use crate::tlb::{EntryHi, EntryLo, SoftTlb, Tlb};

/// Re-export constants as info module.
pub use kernel_info::memory as info;
