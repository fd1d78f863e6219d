//! # Kernel synchronization primitives
//!
//! The memory manager needs exactly two things from this crate: a spin lock
//! around the machine-wide frame table, and a way to run a short section with
//! interrupts masked (TLB maintenance). Interrupt masking is expressed through
//! the [`InterruptControl`] trait so the same code runs against the real
//! processor status register and against [`SoftInterrupts`] in host tests.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod spin_lock;

pub use irq::{InterruptControl, IrqGuard, SoftInterrupts};
pub use spin_lock::{SpinLock, SpinLockGuard};
