use crate::sizes::{KB, SECTOR_SIZE};

// Page size is 4KB. This is a property of x86 processors.
pub const PAGE_FRAME_SIZE: usize = 4 * KB;

// Any virtual address at or above OFFSET is a kernel address.
pub const OFFSET: usize = 0x80000000;

pub const PAGE_MASK: usize = PAGE_FRAME_SIZE - 1;

/// Number of contiguous block sectors holding one page.
pub const SECTORS_PER_PAGE: usize = PAGE_FRAME_SIZE / SECTOR_SIZE as usize;

/// Number of physical frames handed to user pages when nothing else is
/// configured.
pub const DEFAULT_USER_FRAMES: usize = 256;

#[inline]
pub const fn page_round_down(addr: usize) -> usize {
    addr & !PAGE_MASK
}

/// Rounds `addr` up to the next page boundary, or `None` on overflow.
#[inline]
pub const fn page_round_up(addr: usize) -> Option<usize> {
    match addr.checked_add(PAGE_MASK) {
        Some(end) => Some(end & !PAGE_MASK),
        None => None,
    }
}

#[inline]
pub const fn page_offset(addr: usize) -> usize {
    addr & PAGE_MASK
}

#[inline]
pub const fn is_page_aligned(addr: usize) -> bool {
    page_offset(addr) == 0
}

/// Number of pages needed to hold `len` bytes.
#[inline]
pub const fn pages_spanned(len: usize) -> usize {
    len / PAGE_FRAME_SIZE + if len % PAGE_FRAME_SIZE == 0 { 0 } else { 1 }
}

/// Page 0 is never mapped, so null dereferences always fault.
#[inline]
pub const fn is_user_vaddr(addr: usize) -> bool {
    addr >= PAGE_FRAME_SIZE && addr < OFFSET
}

#[inline]
pub const fn is_kernel_vaddr(addr: usize) -> bool {
    addr >= OFFSET
}

/// Whether `[start, start + len)` lies entirely in user space.
pub fn is_user_range(start: usize, len: usize) -> bool {
    if len == 0 {
        return is_user_vaddr(start);
    }
    let Some(end) = start.checked_add(len) else {
        return false;
    };
    is_user_vaddr(start) && end <= OFFSET
}
