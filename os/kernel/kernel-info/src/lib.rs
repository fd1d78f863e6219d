//! # Kernel Configuration and Boot Interface
//!
//! This crate is the single source of truth for the user address-space layout
//! and for the physical memory range the kernel discovers at boot. Both the
//! virtual-memory manager and the process loader read their constants from
//! here so that the two never disagree about where the stack or the heap may
//! live.
//!
//! ## Overview
//!
//! ### Memory Layout ([`memory`])
//! Fixed, compile-time constants describing a 32-bit user address space:
//! * **Page geometry**: [`PAGE_SIZE`](memory::PAGE_SIZE) and derived masks
//! * **User segment**: [`USERTOP`](memory::USERTOP) and the initial stack pointer
//! * **Limits**: the stack reservation and the per-process heap ceiling
//! * **Translation cache**: the number of TLB slots on the processor
//!
//! ### Boot Information ([`boot`])
//! The RAM range reported by the platform after the kernel image has been
//! placed. It sizes the frame allocator and, through it, every page table.
//!
//! ## User Address Space
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │      (unmapped, null guard)     │
//!   text.base ├─────────────────────────────────┤
//!             │      Text (first region)        │
//!   data.base ├─────────────────────────────────┤
//!             │      Data (second region)       │
//!   heap.base ├─────────────────────────────────┤
//!             │      Heap (grows up, sbrk)      │
//!    heap.top ├ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ┤
//!             │           (free)                │
//! STACK_FLOOR ├─────────────────────────────────┤
//!             │      Stack (grows down)         │
//! USERSTACK / ├─────────────────────────────────┤ 0x8000_0000
//!     USERTOP │      Kernel segments            │
//! 0xFFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! All layout constants carry `const` assertions, so an inconsistent
//! configuration fails to compile rather than corrupting a process at runtime.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
