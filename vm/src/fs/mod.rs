//! The byte-addressed file abstraction the pager reads from and writes back
//! to, and the lock serializing every such access.

pub mod tempfs;

use crate::sync::Mutex;
use alloc::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// no space left on device
    NoSpace,
    /// Fewer bytes were transferred than requested
    ShortTransfer,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoSpace => write!(f, "no space left on device"),
            Self::ShortTransfer => write!(f, "short transfer"),
        }
    }
}

impl core::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;

/// An open regular file.
///
/// Dropping a handle closes it. Handles obtained through [`File::reopen`]
/// refer to the same file but live independently of the original.
pub trait File: Send + Sync {
    /// Read from the file into `buf` at `offset`, returning the number of bytes
    /// read. Reading at or past the end reads nothing.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;
    /// Write `buf` to the file at `offset`, growing the file as needed.
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize>;
    /// Length of the file in bytes.
    fn length(&self) -> Result<u64>;
    /// Open another handle to the same file.
    fn reopen(&self) -> Result<Arc<dyn File>>;
}

/// The system-wide file operation lock.
///
/// Every read, write and length query the virtual memory subsystem makes goes
/// through here, one at a time.
#[derive(Default)]
pub struct FileLock {
    lock: Mutex<()>,
}

impl FileLock {
    pub const fn new() -> Self {
        Self {
            lock: Mutex::new(()),
        }
    }

    /// Read exactly `buf.len()` bytes at `offset`.
    pub fn read_exact_at(&self, file: &dyn File, offset: u64, buf: &mut [u8]) -> Result<()> {
        let _guard = self.lock.lock();
        let n = file.read_at(offset, buf)?;
        if n != buf.len() {
            return Err(Error::ShortTransfer);
        }
        Ok(())
    }

    /// Write all of `buf` at `offset`.
    pub fn write_all_at(&self, file: &dyn File, offset: u64, buf: &[u8]) -> Result<()> {
        let _guard = self.lock.lock();
        let n = file.write_at(offset, buf)?;
        if n != buf.len() {
            return Err(Error::ShortTransfer);
        }
        Ok(())
    }

    pub fn length(&self, file: &dyn File) -> Result<u64> {
        let _guard = self.lock.lock();
        file.length()
    }

    pub fn reopen(&self, file: &dyn File) -> Result<Arc<dyn File>> {
        let _guard = self.lock.lock();
        file.reopen()
    }
}
