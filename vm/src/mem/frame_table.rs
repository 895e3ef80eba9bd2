use super::page_replacement::{PageReplacementPolicy, SecondChance};
use super::spt::{FileExtent, PageState, SupplementalPageTable};
use super::{Frame, Pid, VirtualMemory};
use crate::error::{Result, VmError};
use crate::paging::PageMapper;
use crate::sync::Mutex;
use alloc::boxed::Box;
use alloc::sync::Weak;
use alloc::vec::Vec;
use bitbybit::bitfield;
use log::{debug, error, trace, warn};

#[bitfield(u8, default = 0)]
pub struct FrameFlags {
    #[bit(0, rw)]
    allocated: bool,
    // A pinned frame is never chosen for eviction.
    #[bit(1, rw)]
    pinned: bool,
}

/// The user page a frame currently holds.
#[derive(Clone)]
pub struct FrameOwner {
    pub pid: Pid,
    pub page: usize,
    pub spt: Weak<Mutex<SupplementalPageTable>>,
}

pub struct FrameEntry {
    flags: FrameFlags,
    owner: Option<FrameOwner>,
}

impl FrameEntry {
    pub fn is_allocated(&self) -> bool {
        self.flags.allocated()
    }

    pub fn is_pinned(&self) -> bool {
        self.flags.pinned()
    }

    pub fn owner(&self) -> Option<&FrameOwner> {
        self.owner.as_ref()
    }
}

impl Default for FrameEntry {
    fn default() -> Self {
        Self {
            flags: FrameFlags::DEFAULT,
            owner: None,
        }
    }
}

/// Bookkeeping for the frames of [`PhysicalMemory`](super::PhysicalMemory)
/// that hold user pages.
///
/// Free frames are handed out next-fit. Once all are in use, the replacement
/// policy picks a victim and its page is written out to swap, or to its file
/// for memory-mapped pages.
pub struct FrameTable {
    entries: Box<[FrameEntry]>,
    policy: Box<dyn PageReplacementPolicy>,
    /// Where the next search for a free frame starts.
    position: usize,
    allocated: usize,
    evictions: usize,
}

impl FrameTable {
    pub fn new(frames: usize) -> Self {
        Self::with_policy(frames, Box::new(SecondChance::default()))
    }

    pub fn with_policy(frames: usize, policy: Box<dyn PageReplacementPolicy>) -> Self {
        Self {
            entries: (0..frames).map(|_| FrameEntry::default()).collect(),
            policy,
            position: 0,
            allocated: 0,
            evictions: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn allocated(&self) -> usize {
        self.allocated
    }

    pub fn evictions(&self) -> usize {
        self.evictions
    }

    pub fn entry(&self, frame: Frame) -> Option<&FrameEntry> {
        self.entries.get(frame.0)
    }

    /// Every allocated frame with the page it holds.
    pub fn owners(&self) -> Vec<(Frame, Pid, usize)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_allocated())
            .filter_map(|(i, entry)| entry.owner().map(|o| (Frame(i), o.pid, o.page)))
            .collect()
    }

    /// Produce a frame for `owner`, evicting another page if none is free.
    ///
    /// The frame comes back pinned; the caller unpins it once the page is
    /// installed.
    pub fn allocate(&mut self, vm: &VirtualMemory, owner: FrameOwner) -> Result<Frame> {
        let idx = match self.next_fit() {
            Some(idx) => {
                self.allocated += 1;
                idx
            }
            None => {
                let Some(victim) = self.policy.select_victim(&self.entries, &*vm.mmu) else {
                    warn!("frame table: every frame is pinned");
                    return Err(VmError::ResourceExhausted);
                };
                self.evict(vm, victim)?;
                victim
            }
        };

        trace!(
            "frame table: frame {} -> pid {} page {:#x}",
            idx,
            owner.pid,
            owner.page
        );
        self.entries[idx] = FrameEntry {
            flags: FrameFlags::DEFAULT.with_allocated(true).with_pinned(true),
            owner: Some(owner),
        };
        Ok(Frame(idx))
    }

    /// Release `frame` and clear the mapping that referenced it.
    pub fn free(&mut self, mmu: &dyn PageMapper, frame: Frame) -> Result<()> {
        let entry = self.allocated_entry(frame)?;
        if let Some(owner) = entry.owner.take() {
            if mmu.lookup(owner.pid, owner.page) == Some(frame) {
                mmu.unmap(owner.pid, owner.page);
            }
        }
        entry.flags = FrameFlags::DEFAULT;
        self.allocated -= 1;
        trace!("frame table: freed frame {}", frame.0);
        Ok(())
    }

    pub fn pin(&mut self, frame: Frame) -> Result<()> {
        let entry = self.allocated_entry(frame)?;
        entry.flags = entry.flags.with_pinned(true);
        Ok(())
    }

    pub fn unpin(&mut self, frame: Frame) -> Result<()> {
        let entry = self.allocated_entry(frame)?;
        entry.flags = entry.flags.with_pinned(false);
        Ok(())
    }

    fn allocated_entry(&mut self, frame: Frame) -> Result<&mut FrameEntry> {
        match self.entries.get_mut(frame.0) {
            Some(entry) if entry.is_allocated() => Ok(entry),
            _ => {
                error!("frame table: frame {} is not allocated", frame.0);
                Err(VmError::BookkeepingViolation)
            }
        }
    }

    fn next_fit(&mut self) -> Option<usize> {
        let total = self.entries.len();
        let idx = (0..total)
            .map(|i| (self.position + i) % total)
            .find(|&i| !self.entries[i].is_allocated())?;
        self.position = (idx + 1) % total;
        Some(idx)
    }

    /// Write the page held by frame `idx` to its backing store and record the
    /// new location in its owner's table. On error the page stays resident.
    fn evict(&mut self, vm: &VirtualMemory, idx: usize) -> Result<()> {
        let frame = Frame(idx);
        let owner = self.entries[idx]
            .owner
            .clone()
            .ok_or(VmError::BookkeepingViolation)?;
        let Some(spt) = owner.spt.upgrade() else {
            error!("frame table: frame {} outlived its address space", idx);
            return Err(VmError::BookkeepingViolation);
        };
        let mut spt = spt.lock();
        let Some(entry) = spt.get_mut(owner.page) else {
            error!(
                "frame table: pid {} has no page {:#x} for frame {}",
                owner.pid, owner.page, idx
            );
            return Err(VmError::BookkeepingViolation);
        };
        if !matches!(entry.state, PageState::Resident(f) if f == frame) {
            error!(
                "frame table: pid {} page {:#x} is not resident in frame {}",
                owner.pid, owner.page, idx
            );
            return Err(VmError::BookkeepingViolation);
        }

        entry.state = match (entry.mapping, &entry.file) {
            (Some(_), Some(extent)) => evict_to_file(vm, &owner, frame, extent)?,
            _ => evict_to_swap(vm, &owner, frame, entry.writable)?,
        };
        self.evictions += 1;
        debug!(
            "frame table: evicted pid {} page {:#x} from frame {} to {:?}",
            owner.pid, owner.page, idx, entry.state
        );
        Ok(())
    }
}

fn evict_to_swap(
    vm: &VirtualMemory,
    owner: &FrameOwner,
    frame: Frame,
    writable: bool,
) -> Result<PageState> {
    let contents = vm.memory.lock(frame)?;
    let slot = vm.swap.lock().allocate()?;

    vm.mmu.unmap(owner.pid, owner.page);
    let written = vm.swap.lock().write(slot, &contents);
    if let Err(e) = written {
        vm.swap.lock().free(slot)?;
        remap(vm, owner, frame, writable, false)?;
        return Err(e);
    }
    Ok(PageState::Swapped(slot))
}

fn evict_to_file(
    vm: &VirtualMemory,
    owner: &FrameOwner,
    frame: Frame,
    extent: &FileExtent,
) -> Result<PageState> {
    let contents = vm.memory.lock(frame)?;
    let dirty = vm.mmu.is_dirty(owner.pid, owner.page);

    vm.mmu.unmap(owner.pid, owner.page);
    if dirty {
        if let Err(e) = vm.files.write_all_at(
            &*extent.file,
            extent.offset,
            &contents[..extent.read_bytes],
        ) {
            remap(vm, owner, frame, true, true)?;
            return Err(e.into());
        }
    }
    Ok(PageState::FileBacked(extent.clone()))
}

fn remap(
    vm: &VirtualMemory,
    owner: &FrameOwner,
    frame: Frame,
    writable: bool,
    dirty: bool,
) -> Result<()> {
    if !vm.mmu.map(owner.pid, owner.page, frame, writable) {
        error!(
            "frame table: cannot restore pid {} page {:#x}",
            owner.pid, owner.page
        );
        return Err(VmError::BookkeepingViolation);
    }
    vm.mmu.set_dirty(owner.pid, owner.page, dirty);
    Ok(())
}
