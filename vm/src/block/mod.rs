pub mod block_core;
pub mod block_error;
pub mod mem_device;

pub use block_core::{Block, BlockOp, BlockSector, BlockType, BLOCK_SECTOR_SIZE};
pub use block_error::BlockError;
pub use mem_device::MemoryDevice;
