//! Access to the hardware page tables.
//!
//! The subsystem only ever needs to install and clear single user mappings and
//! to look at their accessed and dirty bits; [`PageMapper`] is that contract.
//! [`SoftPageTable`] keeps the entries in memory and plays the part of the MMU
//! for user accesses made through [`AddressSpace`](crate::mem::AddressSpace).

use crate::mem::{Frame, Pid};
use crate::sync::Mutex;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use kidneyos_shared::mem::{is_page_aligned, page_round_down};
use kidneyos_shared::paging::{PageTableEntry, MAX_FRAME_NUMBER};

/// Hardware page table operations, keyed by address space and page-aligned
/// user address.
pub trait PageMapper: Send + Sync {
    /// Map `page` to `frame`. Returns `false` if the mapping could not be
    /// installed, e.g. because `page` is already mapped.
    #[must_use]
    fn map(&self, space: Pid, page: usize, frame: Frame, writable: bool) -> bool;
    /// Remove the mapping for `page`, if any.
    fn unmap(&self, space: Pid, page: usize);
    /// The frame `page` is mapped to, without touching any bits.
    fn lookup(&self, space: Pid, page: usize) -> Option<Frame>;
    /// Walk the page table the way the MMU does for a user access to `addr`,
    /// setting the accessed bit and, for writes, the dirty bit. `None` means
    /// the access faults.
    fn translate(&self, space: Pid, addr: usize, write: bool) -> Option<Frame>;
    fn is_accessed(&self, space: Pid, page: usize) -> bool;
    fn set_accessed(&self, space: Pid, page: usize, accessed: bool);
    fn is_dirty(&self, space: Pid, page: usize) -> bool;
    fn set_dirty(&self, space: Pid, page: usize, dirty: bool);
}

/// Page table entries held in kernel memory.
#[derive(Default)]
pub struct SoftPageTable {
    entries: Mutex<BTreeMap<(Pid, usize), PageTableEntry>>,
}

impl SoftPageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every present mapping of `space`, in address order.
    pub fn mappings(&self, space: Pid) -> Vec<(usize, Frame)> {
        self.entries
            .lock()
            .range((space, 0)..=(space, usize::MAX))
            .filter(|(_, entry)| entry.present())
            .map(|(&(_, page), entry)| (page, Frame(entry.frame_number())))
            .collect()
    }

    fn update(&self, space: Pid, page: usize, f: impl FnOnce(PageTableEntry) -> PageTableEntry) {
        if let Some(entry) = self.entries.lock().get_mut(&(space, page)) {
            *entry = f(*entry);
        }
    }

    fn read(&self, space: Pid, page: usize) -> Option<PageTableEntry> {
        self.entries
            .lock()
            .get(&(space, page))
            .copied()
            .filter(|entry| entry.present())
    }
}

impl PageMapper for SoftPageTable {
    fn map(&self, space: Pid, page: usize, frame: Frame, writable: bool) -> bool {
        debug_assert!(is_page_aligned(page));
        if frame.0 > MAX_FRAME_NUMBER {
            return false;
        }
        let mut entries = self.entries.lock();
        if entries.get(&(space, page)).is_some_and(|e| e.present()) {
            return false;
        }
        entries.insert((space, page), PageTableEntry::user_mapping(frame.0, writable));
        true
    }

    fn unmap(&self, space: Pid, page: usize) {
        self.entries.lock().remove(&(space, page));
    }

    fn lookup(&self, space: Pid, page: usize) -> Option<Frame> {
        self.read(space, page).map(|entry| Frame(entry.frame_number()))
    }

    fn translate(&self, space: Pid, addr: usize, write: bool) -> Option<Frame> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&(space, page_round_down(addr)))?;
        if !entry.present() || (write && !entry.read_write()) {
            return None;
        }
        *entry = entry.with_accessed(true);
        if write {
            *entry = entry.with_dirty(true);
        }
        Some(Frame(entry.frame_number()))
    }

    fn is_accessed(&self, space: Pid, page: usize) -> bool {
        self.read(space, page).is_some_and(|entry| entry.accessed())
    }

    fn set_accessed(&self, space: Pid, page: usize, accessed: bool) {
        self.update(space, page, |entry| entry.with_accessed(accessed));
    }

    fn is_dirty(&self, space: Pid, page: usize) -> bool {
        self.read(space, page).is_some_and(|entry| entry.dirty())
    }

    fn set_dirty(&self, space: Pid, page: usize, dirty: bool) {
        self.update(space, page, |entry| entry.with_dirty(dirty));
    }
}
