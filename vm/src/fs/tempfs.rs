use super::{Error, File, Result};
use crate::sync::Mutex;
use alloc::{sync::Arc, vec::Vec};
use core::cmp::min;
use core::sync::atomic::{AtomicUsize, Ordering};
use log::trace;

#[derive(Default)]
struct TempFileData {
    data: Mutex<Vec<u8>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    handles: AtomicUsize,
}

/// A handle to an in-memory file.
///
/// All handles made with [`File::reopen`] or [`TempFile::handle`] share the
/// same bytes and the same I/O counters.
pub struct TempFile {
    inner: Arc<TempFileData>,
}

impl TempFile {
    pub fn new() -> Self {
        Self::with_contents(&[])
    }

    pub fn with_contents(contents: &[u8]) -> Self {
        let inner = Arc::new(TempFileData {
            data: Mutex::new(contents.to_vec()),
            ..Default::default()
        });
        inner.handles.store(1, Ordering::SeqCst);
        Self { inner }
    }

    /// Another open handle to this file.
    pub fn handle(&self) -> Self {
        self.inner.handles.fetch_add(1, Ordering::SeqCst);
        Self {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Snapshot of the file contents, bypassing the counters.
    pub fn contents(&self) -> Vec<u8> {
        self.inner.data.lock().clone()
    }

    /// Shrink or zero-extend the file to `len` bytes.
    pub fn set_len(&self, len: usize) {
        self.inner.data.lock().resize(len, 0);
    }

    /// Number of `read_at` calls made through any handle.
    pub fn reads(&self) -> usize {
        self.inner.reads.load(Ordering::SeqCst)
    }

    /// Number of `write_at` calls made through any handle.
    pub fn writes(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Number of handles currently open.
    pub fn open_handles(&self) -> usize {
        self.inner.handles.load(Ordering::SeqCst)
    }
}

impl Default for TempFile {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        self.inner.handles.fetch_sub(1, Ordering::SeqCst);
    }
}

impl File for TempFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        trace!("tempfs: read @ offset {} length {}", offset, buf.len());
        self.inner.reads.fetch_add(1, Ordering::SeqCst);
        let data = self.inner.data.lock();
        if offset >= data.len() as u64 {
            // can't read any data
            return Ok(0);
        }
        let offset = offset as usize; // fits into usize by check above
        let read_len = min(buf.len(), data.len() - offset);
        buf[..read_len].copy_from_slice(&data[offset..offset + read_len]);
        Ok(read_len)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        trace!("tempfs: write @ offset {} length {}", offset, buf.len());
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        let mut data = self.inner.data.lock();
        if offset > (isize::MAX as u64).saturating_sub(buf.len() as u64) {
            // file data would exceed isize::MAX bytes
            return Err(Error::NoSpace);
        }
        let offset = offset as usize;
        let end = offset + buf.len();
        if end > data.len() {
            // return no space error if allocation failed
            let extra = end - data.len();
            data.try_reserve(extra).map_err(|_| Error::NoSpace)?;
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn length(&self) -> Result<u64> {
        Ok(self.inner.data.lock().len() as u64)
    }

    fn reopen(&self) -> Result<Arc<dyn File>> {
        Ok(Arc::new(self.handle()))
    }
}
