use super::mmap::MmapTable;
use super::spt::{FileExtent, PageEntry, PageState, SupplementalPageTable};
use super::{Frame, Pid, VirtualMemory};
use crate::error::{Result, VmError};
use crate::sync::{Mutex, MutexGuard};
use alloc::sync::Arc;
use alloc::vec::Vec;
use kidneyos_shared::mem::{is_page_aligned, is_user_vaddr};
use log::{debug, warn};

/// The virtual memory of one process.
pub struct AddressSpace {
    pid: Pid,
    pub(crate) vm: Arc<VirtualMemory>,
    pub(crate) spt: Arc<Mutex<SupplementalPageTable>>,
    pub(crate) mappings: Mutex<MmapTable>,
    /// Serializes faults, mapping changes and teardown. `true` once the
    /// address space has been torn down.
    exited: Mutex<bool>,
}

impl AddressSpace {
    pub(crate) fn new(pid: Pid, vm: Arc<VirtualMemory>) -> Self {
        Self {
            pid,
            vm,
            spt: Arc::default(),
            mappings: Mutex::default(),
            exited: Mutex::new(false),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn vm(&self) -> &Arc<VirtualMemory> {
        &self.vm
    }

    /// Register a page that reads as zeros until written.
    pub fn add_zero_page(&self, page: usize, writable: bool) -> Result<()> {
        self.add_page(page, PageEntry::zero_fill(writable))
    }

    /// Register a page whose contents are loaded from `extent` on first use.
    pub fn add_file_page(&self, page: usize, extent: FileExtent, writable: bool) -> Result<()> {
        self.add_page(page, PageEntry::file_backed(extent, writable, None))
    }

    fn add_page(&self, page: usize, entry: PageEntry) -> Result<()> {
        if !is_user_vaddr(page) || !is_page_aligned(page) {
            return Err(VmError::InvalidAccess);
        }
        let exited = self.operation();
        if *exited {
            return Err(VmError::InvalidAccess);
        }
        self.spt.lock().insert(page, entry)
    }

    /// Where the page containing `addr` currently is.
    pub fn page_state(&self, addr: usize) -> Option<PageState> {
        self.spt.lock().get(addr).map(|entry| entry.state.clone())
    }

    pub fn page_count(&self) -> usize {
        self.spt.lock().len()
    }

    /// Number of pages currently held in a frame.
    pub fn resident_pages(&self) -> usize {
        let spt = self.spt.lock();
        spt.pages()
            .filter(|&page| spt.get(page).is_some_and(|e| e.state.is_resident()))
            .count()
    }

    pub fn has_exited(&self) -> bool {
        *self.exited.lock()
    }

    /// Tear the address space down: unmap every memory mapping, writing back
    /// what was modified, and release every frame and swap slot.
    ///
    /// Only the first call does anything. Faults afterwards are invalid.
    pub fn exit(&self) {
        let mut exited = self.operation();
        if *exited {
            return;
        }
        *exited = true;

        let regions = self.mappings.lock().take_all();
        for (id, region) in regions {
            debug!("pid {}: unmapping mapping {} at exit", self.pid, id);
            self.destroy_pages(region.pages());
        }
        let pages: Vec<usize> = self.spt.lock().pages().collect();
        self.destroy_pages(pages.into_iter());
        debug!("pid {}: address space torn down", self.pid);
    }

    pub(crate) fn operation(&self) -> MutexGuard<'_, bool> {
        self.exited.lock()
    }

    /// Destroy each page, carrying on past failures. The caller holds the
    /// operation lock.
    pub(crate) fn destroy_pages(&self, pages: impl Iterator<Item = usize>) {
        for page in pages {
            if let Err(e) = self.destroy_page(page) {
                warn!("pid {}: releasing page {:#x}: {}", self.pid, page, e);
            }
        }
    }

    /// Remove the descriptor of `page` and release whatever holds its
    /// contents. Dirty pages of memory mappings are written back to their file
    /// first. The caller holds the operation lock.
    fn destroy_page(&self, page: usize) -> Result<()> {
        let entry = {
            let mut frames = self.vm.frames.lock();
            let mut spt = self.spt.lock();
            let Some(entry) = spt.remove(page) else {
                return Err(VmError::BookkeepingViolation);
            };
            // Pinned, the frame can no longer be chosen for eviction once the
            // locks are dropped.
            if let PageState::Resident(frame) = entry.state {
                frames.pin(frame)?;
            }
            entry
        };

        match entry.state {
            PageState::Resident(frame) => {
                let written = self.write_back(page, frame, &entry);
                self.vm.free_frame(frame)?;
                written
            }
            PageState::Swapped(slot) => self.vm.swap.lock().free(slot),
            PageState::ZeroFill | PageState::FileBacked(_) => Ok(()),
        }
    }

    fn write_back(&self, page: usize, frame: Frame, entry: &PageEntry) -> Result<()> {
        let (Some(_), Some(extent)) = (entry.mapping, &entry.file) else {
            return Ok(());
        };
        let contents = self.vm.memory.lock(frame)?;
        if !self.vm.mmu.is_dirty(self.pid, page) {
            return Ok(());
        }
        self.vm
            .files
            .write_all_at(&*extent.file, extent.offset, &contents[..extent.read_bytes])?;
        Ok(())
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        self.exit();
    }
}
