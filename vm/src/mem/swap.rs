use crate::block::{Block, BlockSector, BlockType, BLOCK_SECTOR_SIZE};
use crate::error::{Result, VmError};
use kidneyos_shared::bitmap::Bitmap;
use kidneyos_shared::mem::{PAGE_FRAME_SIZE, SECTORS_PER_PAGE};
use log::{error, trace};

/// Index of a page-sized slot on the swap device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SwapSlot(pub usize);

/// Page-granular storage on the swap block device.
///
/// A slot is free, occupied (reserved by [`SwapStore::allocate`]) or occupied
/// and written. Reading a slot hands its content back and frees it, so every
/// slot is read at most once per write.
pub struct SwapStore {
    block: Block,
    /// Set bits are slots in use.
    occupied: Bitmap,
    /// Set bits are slots holding a page.
    written: Bitmap,
}

impl SwapStore {
    /// Use `block` as swap. The device is divided into as many whole pages as
    /// fit.
    ///
    /// Panics if `block` is not a swap device.
    pub fn new(block: Block) -> Self {
        assert_eq!(
            block.get_type(),
            BlockType::Swap,
            "block {} is not a swap device",
            block.get_name()
        );
        let slots = block.get_size() as usize / SECTORS_PER_PAGE;
        trace!("swap: {} slots on {}", slots, block);
        Self {
            block,
            occupied: Bitmap::new(slots),
            written: Bitmap::new(slots),
        }
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.occupied.len()
    }

    /// Number of occupied slots.
    pub fn used(&self) -> usize {
        self.occupied.count(true)
    }

    pub fn is_occupied(&self, slot: SwapSlot) -> bool {
        slot.0 < self.capacity() && self.occupied.test(slot.0)
    }

    /// The swap device, for its I/O counters.
    pub fn block(&self) -> &Block {
        &self.block
    }

    /// Reserve the first free slot.
    pub fn allocate(&mut self) -> Result<SwapSlot> {
        let Some(idx) = self.occupied.scan_and_flip(false) else {
            trace!("swap: out of slots");
            return Err(VmError::ResourceExhausted);
        };
        trace!("swap: allocated slot {}", idx);
        Ok(SwapSlot(idx))
    }

    /// Store `page` in `slot`, which must be reserved and not yet written.
    ///
    /// If the device fails the slot stays reserved; the caller decides whether
    /// to retry or [`free`](Self::free) it.
    pub fn write(&mut self, slot: SwapSlot, page: &[u8]) -> Result<()> {
        self.check(slot, true, false)?;
        if page.len() != PAGE_FRAME_SIZE {
            return Err(VmError::BookkeepingViolation);
        }

        for (i, sector) in page.chunks_exact(BLOCK_SECTOR_SIZE).enumerate() {
            self.block.write(Self::sector(slot, i)?, sector)?;
        }
        self.written.set(slot.0, true);
        trace!("swap: wrote slot {}", slot.0);
        Ok(())
    }

    /// Load the page stored in `slot` into `page` and free the slot.
    ///
    /// If the device fails the slot keeps its content.
    pub fn read(&mut self, slot: SwapSlot, page: &mut [u8]) -> Result<()> {
        self.check(slot, true, true)?;
        if page.len() != PAGE_FRAME_SIZE {
            return Err(VmError::BookkeepingViolation);
        }

        for (i, sector) in page.chunks_exact_mut(BLOCK_SECTOR_SIZE).enumerate() {
            self.block.read(Self::sector(slot, i)?, sector)?;
        }
        self.release(slot);
        trace!("swap: read slot {}", slot.0);
        Ok(())
    }

    /// Give back an occupied slot without reading it.
    pub fn free(&mut self, slot: SwapSlot) -> Result<()> {
        if !self.is_occupied(slot) {
            error!("swap: freeing slot {} which is not in use", slot.0);
            return Err(VmError::BookkeepingViolation);
        }
        self.release(slot);
        trace!("swap: freed slot {}", slot.0);
        Ok(())
    }

    /// Reserve a slot and write `page` to it. A failed write releases the slot.
    pub fn swap_out(&mut self, page: &[u8]) -> Result<SwapSlot> {
        let slot = self.allocate()?;
        if let Err(e) = self.write(slot, page) {
            self.release(slot);
            return Err(e);
        }
        Ok(slot)
    }

    fn release(&mut self, slot: SwapSlot) {
        self.occupied.set(slot.0, false);
        self.written.set(slot.0, false);
    }

    fn check(&self, slot: SwapSlot, occupied: bool, written: bool) -> Result<()> {
        if slot.0 >= self.capacity()
            || self.occupied.test(slot.0) != occupied
            || self.written.test(slot.0) != written
        {
            error!(
                "swap: slot {} used out of order (capacity {})",
                slot.0,
                self.capacity()
            );
            return Err(VmError::BookkeepingViolation);
        }
        Ok(())
    }

    fn sector(slot: SwapSlot, i: usize) -> Result<BlockSector> {
        BlockSector::try_from(slot.0 * SECTORS_PER_PAGE + i)
            .map_err(|_| VmError::BookkeepingViolation)
    }
}
