//! # Errors

use crate::addresses::{FrameNumber, VirtualAddress};

/// Failures reported by the memory manager.
///
/// Allocation failures are always reported after every partially acquired
/// resource has been released again. Internal-consistency failures are not
/// represented here; they panic.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmError {
    /// No free frame run, or a kernel structure could not be allocated.
    #[error("out of memory")]
    OutOfMemory,
    /// Only a text and a data region can be defined per address space.
    #[error("too many regions")]
    TooManyRegions,
    /// The heap would grow into the stack reservation.
    #[error("heap would grow into the stack")]
    OutOfAddressSpace,
    /// The heap would exceed its per-process ceiling.
    #[error("heap would exceed its size limit")]
    ResourceLimit,
    #[error("invalid argument")]
    InvalidArgument,
    /// The address lies outside every region of the address space.
    #[error("bad address {0}")]
    BadAddress(VirtualAddress),
    /// `free` was called with a frame that does not start an allocation.
    #[error("frame {0} does not start an allocation")]
    NotRunStart(FrameNumber),
    /// `free` was called with a frame that is not allocated.
    #[error("frame {0} is not in use")]
    FrameNotInUse(FrameNumber),
}

/// Process-visible error numbers returned by system calls.
#[repr(i32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Errno {
    /// `EINVAL`
    Inval = 1,
    /// `EFAULT`
    Fault = 2,
    /// `ENOMEM`
    NoMem = 4,
    /// `EUNIMP`
    Unimp = 14,
}

impl Errno {
    #[inline]
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }
}

impl VmError {
    /// The errno a system call reports for this failure.
    #[must_use]
    pub const fn errno(self) -> Errno {
        match self {
            Self::OutOfMemory | Self::OutOfAddressSpace | Self::ResourceLimit => Errno::NoMem,
            Self::TooManyRegions => Errno::Unimp,
            Self::InvalidArgument | Self::NotRunStart(_) | Self::FrameNotInUse(_) => Errno::Inval,
            Self::BadAddress(_) => Errno::Fault,
        }
    }
}

impl From<VmError> for Errno {
    fn from(e: VmError) -> Self {
        e.errno()
    }
}
