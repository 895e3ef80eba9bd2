//! Kernel access to user memory.
//!
//! Each access walks the page table the way the MMU would, loading pages on
//! demand, and copies while holding the frame's contents lock. Since eviction
//! unmaps under that same lock, a mapping still present once the lock is held
//! stays valid for the whole copy.

use super::fault::Access;
use super::process::AddressSpace;
use crate::error::{Result, VmError};
use core::cmp::min;
use core::ops::Range;
use kidneyos_shared::mem::{is_user_range, page_offset, page_round_down, PAGE_FRAME_SIZE};

impl AddressSpace {
    /// Copy `buf.len()` bytes of user memory at `addr` into `buf`.
    pub fn read_user(&self, addr: usize, buf: &mut [u8]) -> Result<()> {
        self.access_user(addr, buf.len(), Access::Read, |page, range| {
            buf[range].copy_from_slice(page);
        })
    }

    /// Copy `data` into user memory at `addr`.
    pub fn write_user(&self, addr: usize, data: &[u8]) -> Result<()> {
        self.access_user(addr, data.len(), Access::Write, |page, range| {
            page.copy_from_slice(&data[range]);
        })
    }

    pub fn read_u32(&self, addr: usize) -> Result<u32> {
        let mut bytes = [0; 4];
        self.read_user(addr, &mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Run `copy` on each page-sized piece of `[addr, addr + len)`, passing
    /// the piece of the frame and the matching range of the caller's buffer.
    fn access_user(
        &self,
        addr: usize,
        len: usize,
        access: Access,
        mut copy: impl FnMut(&mut [u8], Range<usize>),
    ) -> Result<()> {
        if !is_user_range(addr, len) {
            return Err(VmError::InvalidAccess);
        }
        let write = access == Access::Write;

        let mut done = 0;
        while done < len {
            let current = addr + done;
            let page = page_round_down(current);
            let start = page_offset(current);
            let chunk = min(len - done, PAGE_FRAME_SIZE - start);

            loop {
                let Some(frame) = self.vm.mmu.translate(self.pid(), current, write) else {
                    self.load(current, access)?;
                    continue;
                };
                let mut contents = self.vm.memory.lock(frame)?;
                // Evicted between the walk and the lock: go around again.
                if self.vm.mmu.lookup(self.pid(), page) != Some(frame) {
                    continue;
                }
                copy(&mut contents[start..start + chunk], done..done + chunk);
                break;
            }
            done += chunk;
        }
        Ok(())
    }
}
