use crate::block::block_error::BlockError;
use crate::fs;
use core::error::Error;
use core::fmt::{Debug, Display, Formatter};
use kidneyos_syscalls::KILLED_EXIT_STATUS;

/// Why a virtual memory operation could not complete.
///
/// None of these are retried. The syscall/fault boundary terminates the
/// owning process with [`VmError::exit_status`]; the global tables stay
/// consistent because every mutation happens behind their locks.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// The address has no page table entry, lies outside the user region, or
    /// the access violates the page's protection.
    InvalidAccess,
    /// A short or failed read or write against a file or the swap device.
    IoFailure,
    /// The swap device has no free slot, or no frame can be produced.
    ResourceExhausted,
    /// Internal bookkeeping is corrupt: a double free of a swap slot, a frame
    /// lookup miss, a duplicate page.
    BookkeepingViolation,
}

impl VmError {
    /// Status the owning process exits with when this error terminates it.
    pub const fn exit_status(self) -> i32 {
        KILLED_EXIT_STATUS
    }
}

impl Debug for VmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            VmError::InvalidAccess => write!(f, "InvalidAccess"),
            VmError::IoFailure => write!(f, "IoFailure"),
            VmError::ResourceExhausted => write!(f, "ResourceExhausted"),
            VmError::BookkeepingViolation => write!(f, "BookkeepingViolation"),
        }
    }
}

impl Display for VmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            VmError::InvalidAccess => write!(f, "invalid memory access"),
            VmError::IoFailure => write!(f, "page I/O failed"),
            VmError::ResourceExhausted => write!(f, "out of swap space or frames"),
            VmError::BookkeepingViolation => write!(f, "virtual memory bookkeeping violated"),
        }
    }
}

impl Error for VmError {}

impl From<BlockError> for VmError {
    fn from(_: BlockError) -> Self {
        VmError::IoFailure
    }
}

impl From<fs::Error> for VmError {
    fn from(_: fs::Error) -> Self {
        VmError::IoFailure
    }
}

pub type Result<T> = core::result::Result<T, VmError>;
