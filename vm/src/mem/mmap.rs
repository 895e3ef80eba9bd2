use super::process::AddressSpace;
use super::spt::{FileExtent, PageEntry};
use crate::fs::File;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cmp::min;
use core::fmt;
use kidneyos_shared::mem::{is_page_aligned, is_user_range, pages_spanned, PAGE_FRAME_SIZE};
use kidneyos_syscalls::MapId;
use log::debug;

/// Why a file could not be mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmapError {
    NullAddress,
    Misaligned,
    EmptyFile,
    /// The file could not be reopened or its length read.
    Unreadable,
    /// Part of the mapping would lie outside user space.
    OutsideUserSpace,
    /// Part of the mapping would cover a page already in use.
    Overlap,
    /// The address space has been torn down.
    Exited,
    /// Every mapping id has been handed out.
    IdsExhausted,
}

impl fmt::Display for MmapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NullAddress => write!(f, "cannot map at address 0"),
            Self::Misaligned => write!(f, "address is not page aligned"),
            Self::EmptyFile => write!(f, "file is empty"),
            Self::Unreadable => write!(f, "file cannot be read"),
            Self::OutsideUserSpace => write!(f, "mapping leaves user space"),
            Self::Overlap => write!(f, "mapping overlaps existing pages"),
            Self::Exited => write!(f, "process has exited"),
            Self::IdsExhausted => write!(f, "no mapping ids left"),
        }
    }
}

impl core::error::Error for MmapError {}

/// A file mapped into consecutive pages.
pub struct MmapRegion {
    /// A handle of its own, so closing the caller's descriptor leaves the
    /// mapping intact.
    file: Arc<dyn File>,
    start: usize,
    page_count: usize,
}

impl MmapRegion {
    pub fn start(&self) -> usize {
        self.start
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn file(&self) -> &Arc<dyn File> {
        &self.file
    }

    pub fn pages(&self) -> impl Iterator<Item = usize> {
        let start = self.start;
        (0..self.page_count).map(move |i| start + i * PAGE_FRAME_SIZE)
    }
}

/// The memory mappings of one process. Ids count up from 0 and are never
/// reused.
pub struct MmapTable {
    regions: BTreeMap<MapId, MmapRegion>,
    /// `None` once `MapId::MAX` has been handed out.
    next_id: Option<MapId>,
}

impl Default for MmapTable {
    fn default() -> Self {
        Self {
            regions: BTreeMap::new(),
            next_id: Some(0),
        }
    }
}

impl MmapTable {
    /// The id the next inserted region will get.
    pub fn next_id(&self) -> Option<MapId> {
        self.next_id
    }

    pub fn insert(&mut self, region: MmapRegion) -> Option<MapId> {
        let id = self.next_id?;
        self.next_id = id.checked_add(1);
        self.regions.insert(id, region);
        Some(id)
    }

    pub fn get(&self, id: MapId) -> Option<&MmapRegion> {
        self.regions.get(&id)
    }

    pub fn remove(&mut self, id: MapId) -> Option<MmapRegion> {
        self.regions.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn take_all(&mut self) -> Vec<(MapId, MmapRegion)> {
        core::mem::take(&mut self.regions).into_iter().collect()
    }
}

impl AddressSpace {
    /// Map all of `file` at `addr`.
    ///
    /// Nothing is read until a page is first touched. The last page reads as
    /// zeros past the end of the file. Every page is writable.
    pub fn mmap(&self, file: &dyn File, addr: usize) -> Result<MapId, MmapError> {
        let exited = self.operation();
        if *exited {
            return Err(MmapError::Exited);
        }
        if addr == 0 {
            return Err(MmapError::NullAddress);
        }
        if !is_page_aligned(addr) {
            return Err(MmapError::Misaligned);
        }

        let file = self
            .vm
            .files
            .reopen(file)
            .map_err(|_| MmapError::Unreadable)?;
        let length = self
            .vm
            .files
            .length(&*file)
            .map_err(|_| MmapError::Unreadable)?;
        if length == 0 {
            return Err(MmapError::EmptyFile);
        }
        let length = usize::try_from(length).map_err(|_| MmapError::OutsideUserSpace)?;
        if !is_user_range(addr, length) {
            return Err(MmapError::OutsideUserSpace);
        }
        let page_count = pages_spanned(length);

        let mut mappings = self.mappings.lock();
        let id = mappings.next_id().ok_or(MmapError::IdsExhausted)?;
        {
            let mut spt = self.spt.lock();
            if spt.contains_range(addr, page_count * PAGE_FRAME_SIZE) {
                return Err(MmapError::Overlap);
            }
            for i in 0..page_count {
                let offset = i * PAGE_FRAME_SIZE;
                let extent = FileExtent::new(
                    Arc::clone(&file),
                    offset as u64,
                    min(PAGE_FRAME_SIZE, length - offset),
                );
                spt.insert(addr + offset, PageEntry::file_backed(extent, true, Some(id)))
                    .map_err(|_| MmapError::Overlap)?;
            }
        }
        let inserted = mappings.insert(MmapRegion {
            file,
            start: addr,
            page_count,
        });
        debug_assert_eq!(inserted, Some(id));

        debug!(
            "pid {}: mapping {} at {:#x}, {} pages",
            self.pid(),
            id,
            addr,
            page_count
        );
        Ok(id)
    }

    /// Remove mapping `id`, writing modified pages back to the file.
    ///
    /// Unknown ids, including ones already unmapped, are ignored.
    pub fn munmap(&self, id: MapId) {
        let _exited = self.operation();
        let Some(region) = self.mappings.lock().remove(id) else {
            return;
        };
        self.destroy_pages(region.pages());
        debug!("pid {}: unmapped mapping {}", self.pid(), id);
    }

    pub fn mapping_count(&self) -> usize {
        self.mappings.lock().len()
    }
}
