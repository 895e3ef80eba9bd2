// https://wiki.osdev.org/Paging

// Frame numbers are checked against MAX_FRAME_NUMBER before narrowing.
#![allow(clippy::cast_possible_truncation)]

use crate::mem::PAGE_FRAME_SIZE;
use arbitrary_int::u20;
use bitbybit::bitfield;

/// Highest frame number a page table entry can address.
pub const MAX_FRAME_NUMBER: usize = (1 << 20) - 1;

#[bitfield(u32, default = 0)]
pub struct PageTableEntry {
    #[bit(0, rw)]
    present: bool,
    #[bit(1, rw)]
    read_write: bool,
    #[bit(2, rw)]
    user_supervisor: bool,
    #[bit(3, rw)]
    write_through: bool,
    #[bit(4, rw)]
    cache_disable: bool,
    #[bit(5, rw)]
    accessed: bool,
    #[bit(6, rw)]
    dirty: bool,
    #[bit(7, rw)]
    page_attribute_table: bool,
    #[bit(8, rw)]
    global: bool,
    #[bits(12..=31, rw)]
    page_frame_address: u20,
}

impl PageTableEntry {
    /// A present user mapping of frame number `frame`, with accessed and
    /// dirty clear.
    ///
    /// Panics if `frame` exceeds [`MAX_FRAME_NUMBER`].
    pub fn user_mapping(frame: usize, writable: bool) -> Self {
        assert!(frame <= MAX_FRAME_NUMBER, "frame {frame} not addressable");
        Self::DEFAULT
            .with_present(true)
            .with_user_supervisor(true)
            .with_read_write(writable)
            .with_page_frame_address(u20::new(frame as u32))
    }

    pub fn frame_number(&self) -> usize {
        self.page_frame_address().value() as usize
    }

    pub fn physical_address(&self) -> usize {
        self.frame_number() * PAGE_FRAME_SIZE
    }
}
