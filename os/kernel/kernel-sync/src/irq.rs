//! # Interrupt masking
//!
//! [`InterruptControl`] abstracts the processor's global interrupt-enable bit.
//! [`IrqGuard`] is the RAII form of the classic "raise priority, do work,
//! restore previous level" pattern: it masks interrupts on creation and
//! re-enables them on drop **only** if they were enabled before, so guards
//! nest correctly.
//!
//! # Examples
//!
//! ```
//! use kernel_sync::{InterruptControl, IrqGuard, SoftInterrupts};
//!
//! let cpu = SoftInterrupts::new(true);
//! {
//!     let _outer = IrqGuard::new(&cpu);
//!     {
//!         let _inner = IrqGuard::new(&cpu);
//!         assert!(!cpu.enabled());
//!     }
//!     // The inner guard found interrupts already off and left them off.
//!     assert!(!cpu.enabled());
//! }
//! assert!(cpu.enabled());
//! ```

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Access to a processor's global interrupt-enable state.
///
/// Implementations for real hardware wrap the privileged status-register
/// instructions and must only be used in kernel mode.
pub trait InterruptControl {
    /// Mask interrupts. Returns whether they were enabled before the call.
    fn disable(&self) -> bool;

    /// Unmask interrupts.
    fn enable(&self);

    /// Whether interrupts are currently enabled.
    fn enabled(&self) -> bool;
}

/// RAII guard that masks interrupts on creation and restores them on drop.
#[must_use = "interrupts are restored as soon as the guard is dropped"]
pub struct IrqGuard<'a, C: InterruptControl + ?Sized> {
    ctl: &'a C,
    /// Whether interrupts were enabled when the guard was created.
    were_enabled: bool,
}

impl<'a, C: InterruptControl + ?Sized> IrqGuard<'a, C> {
    #[inline]
    pub fn new(ctl: &'a C) -> Self {
        let were_enabled = ctl.disable();
        Self { ctl, were_enabled }
    }

    /// Whether this guard will re-enable interrupts when dropped.
    #[inline]
    #[must_use]
    pub const fn restores(&self) -> bool {
        self.were_enabled
    }
}

impl<C: InterruptControl + ?Sized> Drop for IrqGuard<'_, C> {
    fn drop(&mut self) {
        if self.were_enabled {
            self.ctl.enable();
        }
    }
}

/// Interrupt-enable bit held in memory.
///
/// Used on the host and in tests in place of the processor status register.
/// It also counts how many times interrupts were masked, which lets callers
/// check that a critical section actually ran with interrupts off.
#[derive(Debug)]
pub struct SoftInterrupts {
    enabled: AtomicBool,
    disables: AtomicUsize,
}

impl SoftInterrupts {
    #[must_use]
    pub const fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            disables: AtomicUsize::new(0),
        }
    }

    /// Number of enabled-to-disabled transitions so far.
    #[must_use]
    pub fn disable_count(&self) -> usize {
        self.disables.load(Ordering::Relaxed)
    }
}

impl Default for SoftInterrupts {
    fn default() -> Self {
        Self::new(true)
    }
}

impl InterruptControl for SoftInterrupts {
    fn disable(&self) -> bool {
        let was = self.enabled.swap(false, Ordering::AcqRel);
        if was {
            self.disables.fetch_add(1, Ordering::Relaxed);
        }
        was
    }

    fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}
