use super::swap::SwapSlot;
use super::Frame;
use crate::error::{Result, VmError};
use crate::fs::File;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use kidneyos_shared::mem::{is_page_aligned, page_round_down, PAGE_FRAME_SIZE};
use kidneyos_syscalls::MapId;

/// The part of a file that backs one page: `read_bytes` bytes at `offset`,
/// followed by `zero_bytes` zeros.
#[derive(Clone)]
pub struct FileExtent {
    pub file: Arc<dyn File>,
    pub offset: u64,
    pub read_bytes: usize,
    pub zero_bytes: usize,
}

impl FileExtent {
    /// Panics unless `read_bytes + zero_bytes` is one page.
    pub fn new(file: Arc<dyn File>, offset: u64, read_bytes: usize) -> Self {
        assert!(read_bytes <= PAGE_FRAME_SIZE);
        Self {
            file,
            offset,
            read_bytes,
            zero_bytes: PAGE_FRAME_SIZE - read_bytes,
        }
    }
}

impl fmt::Debug for FileExtent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileExtent")
            .field("offset", &self.offset)
            .field("read_bytes", &self.read_bytes)
            .field("zero_bytes", &self.zero_bytes)
            .finish_non_exhaustive()
    }
}

/// Where the contents of a user page are right now.
#[derive(Clone, Debug)]
pub enum PageState {
    /// Not yet touched; reads as zeros.
    ZeroFill,
    /// Not yet touched, or written back; contents come from the file.
    FileBacked(FileExtent),
    Resident(Frame),
    Swapped(SwapSlot),
}

impl PageState {
    pub fn is_resident(&self) -> bool {
        matches!(self, Self::Resident(_))
    }
}

#[derive(Clone, Debug)]
pub struct PageEntry {
    pub state: PageState,
    pub writable: bool,
    /// The file range behind the page, kept while it is resident or swapped
    /// so mapped pages can be written back.
    pub file: Option<FileExtent>,
    /// The memory mapping this page belongs to.
    pub mapping: Option<MapId>,
}

impl PageEntry {
    pub fn zero_fill(writable: bool) -> Self {
        Self {
            state: PageState::ZeroFill,
            writable,
            file: None,
            mapping: None,
        }
    }

    pub fn file_backed(extent: FileExtent, writable: bool, mapping: Option<MapId>) -> Self {
        Self {
            state: PageState::FileBacked(extent.clone()),
            writable,
            file: Some(extent),
            mapping,
        }
    }
}

/// One process's page descriptors, keyed by page-aligned user address.
///
/// Entries live in an arena; the ordered index maps addresses to arena slots
/// and removed slots are reused.
#[derive(Default)]
pub struct SupplementalPageTable {
    entries: Vec<Option<PageEntry>>,
    vacant: Vec<usize>,
    index: BTreeMap<usize, usize>,
}

impl SupplementalPageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a descriptor for `page`. A second descriptor for the same page is
    /// a bookkeeping violation.
    pub fn insert(&mut self, page: usize, entry: PageEntry) -> Result<()> {
        if !is_page_aligned(page) || self.index.contains_key(&page) {
            return Err(VmError::BookkeepingViolation);
        }
        let slot = match self.vacant.pop() {
            Some(slot) => {
                self.entries[slot] = Some(entry);
                slot
            }
            None => {
                self.entries.push(Some(entry));
                self.entries.len() - 1
            }
        };
        self.index.insert(page, slot);
        Ok(())
    }

    /// The descriptor of the page containing `addr`.
    pub fn get(&self, addr: usize) -> Option<&PageEntry> {
        let slot = *self.index.get(&page_round_down(addr))?;
        self.entries[slot].as_ref()
    }

    pub fn get_mut(&mut self, addr: usize) -> Option<&mut PageEntry> {
        let slot = *self.index.get(&page_round_down(addr))?;
        self.entries[slot].as_mut()
    }

    pub fn remove(&mut self, addr: usize) -> Option<PageEntry> {
        let slot = self.index.remove(&page_round_down(addr))?;
        self.vacant.push(slot);
        self.entries[slot].take()
    }

    pub fn contains(&self, addr: usize) -> bool {
        self.index.contains_key(&page_round_down(addr))
    }

    /// Whether any page overlapping `[start, start + len)` has a descriptor.
    pub fn contains_range(&self, start: usize, len: usize) -> bool {
        let first = page_round_down(start);
        match start.checked_add(len) {
            Some(end) => self.index.range(first..end).next().is_some(),
            None => self.index.range(first..).next().is_some(),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Page addresses in ascending order.
    pub fn pages(&self) -> impl Iterator<Item = usize> + '_ {
        self.index.keys().copied()
    }

    /// Remove every descriptor, in ascending address order.
    pub fn drain(&mut self) -> Vec<(usize, PageEntry)> {
        let index = core::mem::take(&mut self.index);
        let drained = index
            .into_iter()
            .filter_map(|(page, slot)| self.entries[slot].take().map(|e| (page, e)))
            .collect();
        self.entries.clear();
        self.vacant.clear();
        drained
    }
}
