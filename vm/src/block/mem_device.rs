use super::block_core::{BlockOp, BlockSector, BLOCK_SECTOR_SIZE};
use super::block_error::BlockError;
use alloc::{vec, vec::Vec};

/// A block device driver that keeps its sectors in kernel memory.
///
/// Used as the swap disk when no real disk is attached. Reads and writes can
/// be made to fail from a given sector on, to exercise error paths.
#[derive(Clone, PartialEq)]
pub struct MemoryDevice {
    data: Vec<u8>,
    failing_from: Option<BlockSector>,
}

impl MemoryDevice {
    pub fn new(sectors: BlockSector) -> Self {
        Self {
            data: vec![0; sectors as usize * BLOCK_SECTOR_SIZE],
            failing_from: None,
        }
    }

    /// Every access to `sector` or above fails.
    pub fn failing_from(mut self, sector: BlockSector) -> Self {
        self.failing_from = Some(sector);
        self
    }

    fn range(&self, sector: BlockSector) -> core::ops::Range<usize> {
        let start = sector as usize * BLOCK_SECTOR_SIZE;
        start..start + BLOCK_SECTOR_SIZE
    }

    fn fails(&self, sector: BlockSector) -> bool {
        self.failing_from.is_some_and(|first| sector >= first)
    }
}

impl BlockOp for MemoryDevice {
    fn read(&mut self, sector: BlockSector, buf: &mut [u8]) -> Result<(), BlockError> {
        if self.fails(sector) {
            return Err(BlockError::ReadError);
        }
        let range = self.range(sector);
        let src = self.data.get(range).ok_or(BlockError::SectorOutOfBounds)?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write(&mut self, sector: BlockSector, buf: &[u8]) -> Result<(), BlockError> {
        if self.fails(sector) {
            return Err(BlockError::WriteError);
        }
        let range = self.range(sector);
        let dst = self
            .data
            .get_mut(range)
            .ok_or(BlockError::SectorOutOfBounds)?;
        dst.copy_from_slice(buf);
        Ok(())
    }
}
