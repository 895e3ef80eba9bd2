//! Bringing pages into memory.

use super::frame_table::FrameOwner;
use super::process::AddressSpace;
use super::spt::PageState;
use super::Frame;
use crate::error::{Result, VmError};
use alloc::sync::Arc;
use kidneyos_shared::mem::{is_user_vaddr, page_round_down};
use log::{error, trace, warn};

/// What caused a page to be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    /// A hardware page fault, from a write if `write` is set.
    Fault { write: bool },
    /// A kernel read of user memory.
    Read,
    /// A kernel write to user memory.
    Write,
}

impl Access {
    fn is_write(self) -> bool {
        matches!(self, Access::Write | Access::Fault { write: true })
    }
}

impl AddressSpace {
    /// Resolve a page fault at `addr`, raised by a write if `write` is set, by
    /// loading the page from wherever its contents are.
    ///
    /// Faulting on an address with no page, outside user space, or writing to
    /// a read-only page is [`VmError::InvalidAccess`]. A page another thread
    /// has loaded in the meantime needs nothing more. If the contents cannot
    /// be read the page keeps its previous state.
    pub fn handle_fault(&self, addr: usize, write: bool) -> Result<()> {
        self.load(addr, Access::Fault { write })
    }

    pub(crate) fn load(&self, addr: usize, access: Access) -> Result<()> {
        if !is_user_vaddr(addr) {
            return Err(VmError::InvalidAccess);
        }
        let exited = self.operation();
        if *exited {
            return Err(VmError::InvalidAccess);
        }

        let page = page_round_down(addr);
        let (state, writable) = {
            let spt = self.spt.lock();
            let entry = spt.get(page).ok_or(VmError::InvalidAccess)?;
            (entry.state.clone(), entry.writable)
        };
        if access.is_write() && !writable {
            if let PageState::Resident(_) = state {
                warn!("pid {}: write to read-only page {:#x}", self.pid(), page);
            }
            return Err(VmError::InvalidAccess);
        }
        if let PageState::Resident(frame) = state {
            // Loaded by another thread since the access missed.
            if matches!(access, Access::Fault { .. })
                && self.vm.mmu.lookup(self.pid(), page) != Some(frame)
            {
                error!(
                    "pid {}: resident page {:#x} is not mapped to frame {}",
                    self.pid(),
                    page,
                    frame.0
                );
                return Err(VmError::BookkeepingViolation);
            }
            return Ok(());
        }

        let frame = self.vm.allocate_frame(FrameOwner {
            pid: self.pid(),
            page,
            spt: Arc::downgrade(&self.spt),
        })?;
        if let Err(e) = self.fill(frame, &state) {
            self.vm.free_frame(frame)?;
            return Err(e);
        }

        if !self.vm.mmu.map(self.pid(), page, frame, writable) {
            self.vm.free_frame(frame)?;
            if let PageState::Swapped(_) = state {
                // The swap read already gave the slot back.
                if let Some(entry) = self.spt.lock().get_mut(page) {
                    entry.state = PageState::ZeroFill;
                }
            }
            return Err(VmError::ResourceExhausted);
        }

        match self.spt.lock().get_mut(page) {
            Some(entry) => entry.state = PageState::Resident(frame),
            None => return Err(VmError::BookkeepingViolation),
        }
        self.vm.unpin_frame(frame)?;
        drop(exited);

        trace!(
            "pid {}: page {:#x} loaded into frame {}",
            self.pid(),
            page,
            frame.0
        );
        Ok(())
    }

    fn fill(&self, frame: Frame, state: &PageState) -> Result<()> {
        let mut contents = self.vm.memory.lock(frame)?;
        match state {
            PageState::ZeroFill => contents.fill(0),
            PageState::FileBacked(extent) => {
                let (data, zeros) = contents.split_at_mut(extent.read_bytes);
                self.vm
                    .files
                    .read_exact_at(&*extent.file, extent.offset, data)?;
                zeros.fill(0);
            }
            PageState::Swapped(slot) => self.vm.swap.lock().read(*slot, &mut contents)?,
            PageState::Resident(_) => return Err(VmError::BookkeepingViolation),
        }
        Ok(())
    }
}
