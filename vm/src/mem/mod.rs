//! Demand-paged user memory.
//!
//! [`VirtualMemory`] is the system-wide half: physical frames, the frame
//! table, the swap store, the page mapper and the file lock. Each process
//! holds an [`AddressSpace`] referring to it.
//!
//! Locks are always taken in this order:
//!
//! 1. an address space's operation lock
//! 2. its mapping table
//! 3. the frame table
//! 4. an address space's supplemental page table
//! 5. a frame's contents
//! 6. the swap store
//! 7. the file lock
//!
//! A supplemental page table lock is never held while taking the frame table
//! lock.

pub mod fault;
pub mod frame_table;
pub mod mmap;
pub mod page_replacement;
pub mod process;
pub mod spt;
pub mod swap;
pub mod user;

use crate::block::Block;
use crate::error::{Result, VmError};
use crate::fs::FileLock;
use crate::paging::PageMapper;
use crate::sync::{Mutex, MutexGuard};
use alloc::{boxed::Box, sync::Arc, vec};
use core::sync::atomic::{AtomicU16, Ordering};
use frame_table::{FrameOwner, FrameTable};
use kidneyos_shared::mem::{DEFAULT_USER_FRAMES, PAGE_FRAME_SIZE};
use log::info;
use swap::SwapStore;

pub use frame_table::FrameEntry;
pub use mmap::{MmapError, MmapRegion, MmapTable};
pub use process::AddressSpace;
pub use spt::{FileExtent, PageEntry, PageState, SupplementalPageTable};
pub use swap::SwapSlot;

pub type Pid = u16;

/// Index of a physical frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Frame(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Number of physical frames available to user pages.
    pub frames: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            frames: DEFAULT_USER_FRAMES,
        }
    }
}

/// The user pool of physical memory. Each frame's bytes sit behind their own
/// lock, which is held for every copy into or out of the frame.
pub struct PhysicalMemory {
    frames: Box<[Mutex<Box<[u8]>>]>,
}

impl PhysicalMemory {
    pub fn new(frames: usize) -> Self {
        Self {
            frames: (0..frames)
                .map(|_| Mutex::new(vec![0; PAGE_FRAME_SIZE].into_boxed_slice()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn lock(&self, frame: Frame) -> Result<MutexGuard<'_, Box<[u8]>>> {
        self.frames
            .get(frame.0)
            .map(Mutex::lock)
            .ok_or(VmError::BookkeepingViolation)
    }
}

/// Counters describing the state of physical memory and swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    pub frames: usize,
    pub frames_allocated: usize,
    pub evictions: usize,
    pub swap_slots: usize,
    pub swap_slots_used: usize,
}

/// State shared by every address space.
pub struct VirtualMemory {
    config: VmConfig,
    pub(crate) frames: Mutex<FrameTable>,
    pub(crate) memory: PhysicalMemory,
    pub(crate) swap: Mutex<SwapStore>,
    pub(crate) mmu: Arc<dyn PageMapper>,
    pub(crate) files: FileLock,
    next_pid: AtomicU16,
}

impl VirtualMemory {
    /// Set up user memory with `swap` as the swap device.
    ///
    /// Panics if `swap` is not a swap block device.
    pub fn new(config: VmConfig, swap: Block, mmu: Arc<dyn PageMapper>) -> Arc<Self> {
        let swap = SwapStore::new(swap);
        info!(
            "vm: {} user frames, {} swap slots",
            config.frames,
            swap.capacity()
        );
        Arc::new(Self {
            config,
            frames: Mutex::new(FrameTable::new(config.frames)),
            memory: PhysicalMemory::new(config.frames),
            swap: Mutex::new(swap),
            mmu,
            files: FileLock::new(),
            next_pid: AtomicU16::new(1),
        })
    }

    pub fn config(&self) -> VmConfig {
        self.config
    }

    pub fn mmu(&self) -> &dyn PageMapper {
        &*self.mmu
    }

    pub fn files(&self) -> &FileLock {
        &self.files
    }

    pub fn memory(&self) -> &PhysicalMemory {
        &self.memory
    }

    /// A new, empty address space with a fresh pid.
    pub fn create_address_space(self: &Arc<Self>) -> AddressSpace {
        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        AddressSpace::new(pid, Arc::clone(self))
    }

    pub fn stats(&self) -> MemoryStats {
        let (frames, frames_allocated, evictions) = {
            let table = self.frames.lock();
            (table.capacity(), table.allocated(), table.evictions())
        };
        let swap = self.swap.lock();
        MemoryStats {
            frames,
            frames_allocated,
            evictions,
            swap_slots: swap.capacity(),
            swap_slots_used: swap.used(),
        }
    }

    /// The process and page held by `frame`, if it is allocated.
    pub fn frame_owner(&self, frame: Frame) -> Option<(Pid, usize)> {
        let table = self.frames.lock();
        let entry = table.entry(frame).filter(|e| e.is_allocated())?;
        entry.owner().map(|owner| (owner.pid, owner.page))
    }

    /// Every allocated frame with the process and page it holds.
    pub fn frame_owners(&self) -> alloc::vec::Vec<(Frame, Pid, usize)> {
        self.frames.lock().owners()
    }

    pub fn swap_block_counts(&self) -> (u32, u32) {
        let swap = self.swap.lock();
        (swap.block().read_count(), swap.block().write_count())
    }

    pub(crate) fn allocate_frame(&self, owner: FrameOwner) -> Result<Frame> {
        self.frames.lock().allocate(self, owner)
    }

    pub(crate) fn free_frame(&self, frame: Frame) -> Result<()> {
        self.frames.lock().free(&*self.mmu, frame)
    }

    pub(crate) fn unpin_frame(&self, frame: Frame) -> Result<()> {
        self.frames.lock().unpin(frame)
    }
}
