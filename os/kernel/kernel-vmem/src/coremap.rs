//! # Coremap: the physical frame allocator
//!
//! One [`Frame`] record per physical page frame in the machine, all behind a
//! single [`SpinLock`]. Every scan-and-mark (allocation) and every release
//! runs inside one critical section, so two threads can never claim the same
//! frame or lose a free.
//!
//! ## Allocation model
//!
//! - [`Coremap::allocate`] is first-fit over the fixed table and hands out
//!   runs of `n` physically contiguous frames. The first frame of a run is
//!   the run start and records the run length.
//! - [`Coremap::allocate_page`] is the single-frame case used for every user
//!   page. It also records which address space and virtual page own the
//!   frame, so ownership is explicit and checkable.
//! - [`Coremap::free`] takes the run start returned by `allocate` and
//!   releases the whole run. Freeing from the middle of a run is rejected.
//!
//! Frames are handed out with whatever contents they had. Callers that
//! expose a frame to user space zero it first.

use crate::addresses::{FrameNumber, PAGE_BYTES, PhysicalAddress, VirtualPageNumber};
use crate::address_space::AddressSpaceId;
use crate::error::VmError;
use crate::phys_mapper::{FrameBytes, Kseg0Mapper, PhysMapper};
use alloc::boxed::Box;
use alloc::vec::Vec;
use kernel_info::boot::PhysicalMemory;
use kernel_info::memory::PAGE_SIZE;
use kernel_sync::SpinLock;
use log::{info, trace, warn};

/// Largest frame count a coremap may manage; the all-ones frame number is
/// reserved as the page table's "unset" marker.
pub const MAX_FRAMES: usize = (1 << 20) - 1;

/// Back-reference from a frame to the single page-table entry using it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct FrameOwner {
    pub space: AddressSpaceId,
    pub page: VirtualPageNumber,
}

/// Bookkeeping for one physical frame.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Frame {
    owner: Option<FrameOwner>,
    run_length: u32,
    is_run_start: bool,
    in_use: bool,
}

impl Frame {
    #[inline]
    #[must_use]
    pub const fn owner(&self) -> Option<FrameOwner> {
        self.owner
    }

    /// Length of the run this frame starts, or `0` if it does not start one.
    #[inline]
    #[must_use]
    pub const fn run_length(&self) -> u32 {
        self.run_length
    }

    #[inline]
    #[must_use]
    pub const fn is_run_start(&self) -> bool {
        self.is_run_start
    }

    #[inline]
    #[must_use]
    pub const fn in_use(&self) -> bool {
        self.in_use
    }
}

/// The machine-wide frame table plus access to frame contents.
pub struct Coremap<M: PhysMapper> {
    memory: PhysicalMemory,
    frames: SpinLock<Box<[Frame]>>,
    mapper: M,
}

impl<M: PhysMapper> Coremap<M> {
    /// Build the frame table for the RAM discovered at boot.
    ///
    /// # Errors
    /// [`VmError::OutOfMemory`] if the table itself cannot be allocated, and
    /// [`VmError::InvalidArgument`] if the range holds more than
    /// [`MAX_FRAMES`] frames.
    pub fn new(memory: PhysicalMemory, mapper: M) -> Result<Self, VmError> {
        let count = memory.frame_count();
        if count > MAX_FRAMES {
            return Err(VmError::InvalidArgument);
        }

        let mut frames = Vec::new();
        frames
            .try_reserve_exact(count)
            .map_err(|_| VmError::OutOfMemory)?;
        frames.resize(count, Frame::default());

        info!(
            "coremap: {count} frames at {:#010x}..{:#010x}",
            memory.first_frame_paddr(),
            memory.end_paddr()
        );

        Ok(Self {
            memory,
            frames: SpinLock::new(frames.into_boxed_slice()),
            mapper,
        })
    }

    /// Total number of frames managed.
    #[inline]
    #[must_use]
    pub const fn frame_count(&self) -> usize {
        self.memory.frame_count()
    }

    /// Number of frames not currently in use.
    #[must_use]
    pub fn free_frames(&self) -> usize {
        self.frames
            .with_lock(|frames| frames.iter().filter(|f| !f.in_use).count())
    }

    /// Snapshot of one frame record.
    #[must_use]
    pub fn frame(&self, frame: FrameNumber) -> Option<Frame> {
        self.frames
            .with_lock(|frames| frames.get(frame.as_usize()).copied())
    }

    /// The page-table entry that owns `frame`, if any.
    #[must_use]
    pub fn owner_of(&self, frame: FrameNumber) -> Option<FrameOwner> {
        self.frame(frame).and_then(|f| f.owner)
    }

    /// Physical address of the first byte of `frame`.
    #[inline]
    #[must_use]
    pub const fn paddr(&self, frame: FrameNumber) -> PhysicalAddress {
        PhysicalAddress::new(self.memory.first_frame_paddr() + frame.as_u32() * PAGE_SIZE)
    }

    /// Claim `n` contiguous frames, first fit.
    ///
    /// # Errors
    /// [`VmError::InvalidArgument`] for `n == 0`, [`VmError::OutOfMemory`] if
    /// no run of `n` free frames exists.
    pub fn allocate(&self, n: usize) -> Result<FrameNumber, VmError> {
        self.claim(n, None)
    }

    /// Claim a single frame for the user page described by `owner`.
    ///
    /// # Errors
    /// [`VmError::OutOfMemory`] if every frame is in use.
    pub fn allocate_page(&self, owner: FrameOwner) -> Result<FrameNumber, VmError> {
        self.claim(1, Some(owner))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn claim(&self, n: usize, owner: Option<FrameOwner>) -> Result<FrameNumber, VmError> {
        if n == 0 {
            return Err(VmError::InvalidArgument);
        }

        let claimed = self.frames.with_lock(|frames| {
            let start = find_free_run(frames, n)?;
            let run = &mut frames[start..start + n];
            for frame in run.iter_mut() {
                frame.in_use = true;
            }
            run[0].is_run_start = true;
            run[0].run_length = n as u32;
            run[0].owner = owner;
            Some(FrameNumber::new(start as u32))
        });

        match claimed {
            Some(frame) => {
                trace!("coremap: claimed {n} frame(s) at {frame} for {owner:?}");
                Ok(frame)
            }
            None => {
                warn!("coremap: no run of {n} free frame(s)");
                Err(VmError::OutOfMemory)
            }
        }
    }

    /// Release the run that starts at `frame`. Returns the number of frames
    /// released.
    ///
    /// # Errors
    /// [`VmError::FrameNotInUse`] if `frame` is free or out of range, and
    /// [`VmError::NotRunStart`] if it lies inside a run without starting it.
    pub fn free(&self, frame: FrameNumber) -> Result<usize, VmError> {
        let released = self.frames.with_lock(|frames| {
            let start = frame.as_usize();
            let head = frames.get(start).ok_or(VmError::FrameNotInUse(frame))?;
            if !head.in_use {
                return Err(VmError::FrameNotInUse(frame));
            }
            if !head.is_run_start {
                return Err(VmError::NotRunStart(frame));
            }

            let n = head.run_length as usize;
            for f in &mut frames[start..start + n] {
                *f = Frame::default();
            }
            Ok(n)
        })?;

        trace!("coremap: released {released} frame(s) at {frame}");
        Ok(released)
    }

    /// Fill `frame` with zeros.
    pub(crate) fn zero_frame(&self, frame: FrameNumber) {
        self.with_frame_mut(frame, |bytes| bytes.fill(0));
    }

    /// Copy the full contents of `src` into `dst`.
    pub(crate) fn copy_frame(&self, src: FrameNumber, dst: FrameNumber) {
        assert_ne!(src, dst, "page copy onto itself");
        // SAFETY: both frames are in use and owned by the calling address
        // spaces; they are distinct, so the two borrows do not alias.
        let (from, to) = unsafe {
            (
                self.mapper.phys_to_mut(self.paddr(src)),
                self.mapper.phys_to_mut(self.paddr(dst)),
            )
        };
        to.copy_from_slice(from);
    }

    /// Run `f` with read access to the contents of an in-use `frame`.
    pub(crate) fn with_frame<R>(&self, frame: FrameNumber, f: impl FnOnce(&FrameBytes) -> R) -> R {
        self.with_frame_mut(frame, |bytes| f(bytes))
    }

    /// Run `f` with the contents of an in-use `frame`.
    pub(crate) fn with_frame_mut<R>(
        &self,
        frame: FrameNumber,
        f: impl FnOnce(&mut FrameBytes) -> R,
    ) -> R {
        debug_assert!(frame.as_usize() < self.frame_count());
        // SAFETY: frames reach here only through the page table of the
        // address space that exclusively owns them.
        let bytes = unsafe { self.mapper.phys_to_mut(self.paddr(frame)) };
        debug_assert_eq!(bytes.len(), PAGE_BYTES);
        f(bytes)
    }
}

impl Coremap<Kseg0Mapper> {
    /// Coremap for the boot-time RAM range, accessed through KSEG0.
    ///
    /// # Errors
    /// As [`Coremap::new`].
    pub fn bootstrap(memory: PhysicalMemory) -> Result<Self, VmError> {
        Self::new(memory, Kseg0Mapper)
    }
}

/// First index of `n` consecutive free frames.
fn find_free_run(frames: &[Frame], n: usize) -> Option<usize> {
    let mut run = 0;
    for (i, frame) in frames.iter().enumerate() {
        if frame.in_use {
            run = 0;
            continue;
        }
        run += 1;
        if run == n {
            return Some(i + 1 - n);
        }
    }
    None
}
