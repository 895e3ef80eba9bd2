use crate::error::Result;
use crate::fs::File;
use crate::mem::AddressSpace;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use kidneyos_syscalls::{
    MapId, ENOSYS, MAP_FAILED, STDIN_FILENO, STDOUT_FILENO, SYS_EXIT, SYS_MMAP, SYS_MUNMAP,
};
use log::{debug, warn};
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

/// The syscall number and arguments a user program pushes before trapping,
/// as laid out on its stack.
#[repr(C)]
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
pub struct SyscallFrame {
    pub number: U32<LittleEndian>,
    pub args: [U32<LittleEndian>; 3],
}

impl SyscallFrame {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    /// Read the frame at the user stack pointer `esp`, faulting its pages in
    /// as needed.
    pub fn read(space: &AddressSpace, esp: usize) -> Result<Self> {
        let mut frame = Self::new_zeroed();
        space.read_user(esp, frame.as_bytes_mut())?;
        Ok(frame)
    }

    pub fn number(&self) -> usize {
        self.number.get() as usize
    }

    pub fn arg(&self, i: usize) -> u32 {
        self.args[i].get()
    }

    /// Argument `i` reinterpreted as a signed value.
    #[allow(clippy::cast_possible_wrap)]
    pub fn signed_arg(&self, i: usize) -> i32 {
        self.arg(i) as i32
    }
}

/// The open files of the calling process.
pub trait FileDescriptorTable {
    fn get(&self, fd: u32) -> Option<Arc<dyn File>>;
}

impl FileDescriptorTable for BTreeMap<u32, Arc<dyn File>> {
    fn get(&self, fd: u32) -> Option<Arc<dyn File>> {
        BTreeMap::get(self, &fd).cloned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallOutcome {
    /// Resume the caller with this return value.
    Return(isize),
    /// The process is gone; report this exit status.
    Exit(i32),
}

/// Decode and run the syscall whose frame is at `esp`.
///
/// A frame that cannot be read kills the process.
pub fn handler(
    space: &AddressSpace,
    fds: &dyn FileDescriptorTable,
    esp: usize,
) -> SyscallOutcome {
    let frame = match SyscallFrame::read(space, esp) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(
                "pid {}: bad syscall frame at {:#x}: {}",
                space.pid(),
                esp,
                e
            );
            space.exit();
            return SyscallOutcome::Exit(e.exit_status());
        }
    };

    match frame.number() {
        SYS_EXIT => {
            space.exit();
            SyscallOutcome::Exit(frame.signed_arg(0))
        }
        SYS_MMAP => {
            let id = mmap(space, fds, frame.arg(0), frame.arg(1));
            SyscallOutcome::Return(id as isize)
        }
        SYS_MUNMAP => {
            space.munmap(frame.signed_arg(0));
            SyscallOutcome::Return(0)
        }
        number => {
            debug!("pid {}: unknown syscall {:#x}", space.pid(), number);
            SyscallOutcome::Return(-ENOSYS)
        }
    }
}

fn mmap(space: &AddressSpace, fds: &dyn FileDescriptorTable, fd: u32, addr: u32) -> MapId {
    if fd == STDIN_FILENO || fd == STDOUT_FILENO {
        return MAP_FAILED;
    }
    let Some(file) = fds.get(fd) else {
        return MAP_FAILED;
    };
    match space.mmap(&*file, addr as usize) {
        Ok(id) => id,
        Err(e) => {
            debug!("pid {}: mmap of fd {} failed: {}", space.pid(), fd, e);
            MAP_FAILED
        }
    }
}

/// Resolve a page fault at `addr`, raised by a write if `write` is set.
/// Returns the exit status if the process had to be terminated, after tearing
/// down its address space.
pub fn page_fault(space: &AddressSpace, addr: usize, write: bool) -> Option<i32> {
    let Err(e) = space.handle_fault(addr, write) else {
        return None;
    };
    warn!(
        "pid {}: killed by page fault at {:#x}: {}",
        space.pid(),
        addr,
        e
    );
    space.exit();
    Some(e.exit_status())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VmError;
    use crate::mem::testing::small_vm;
    use crate::mem::VmConfig;
    use kidneyos_shared::mem::PAGE_FRAME_SIZE;

    const STACK: usize = 0x0800_0000;

    #[test]
    fn test_frame_layout() {
        assert_eq!(SyscallFrame::SIZE, 16);
        let bytes = [
            0x5a, 0, 0, 0, 3, 0, 0, 0, 0, 0x10, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF,
        ];
        let frame = SyscallFrame::read_from(&bytes[..]).unwrap();
        assert_eq!(frame.number(), SYS_MMAP);
        assert_eq!(frame.arg(0), 3);
        assert_eq!(frame.arg(1), 0x1000);
        assert_eq!(frame.signed_arg(2), -1);
    }

    #[test]
    fn test_unreadable_frame_kills() {
        let vm = small_vm(VmConfig { frames: 2 }, 2);
        let space = vm.create_address_space();
        let fds: BTreeMap<u32, Arc<dyn File>> = BTreeMap::new();
        assert_eq!(
            handler(&space, &fds, STACK),
            SyscallOutcome::Exit(VmError::InvalidAccess.exit_status())
        );
        assert!(space.has_exited());
    }

    #[test]
    fn test_unknown_syscall() {
        let vm = small_vm(VmConfig { frames: 2 }, 2);
        let space = vm.create_address_space();
        space.add_zero_page(STACK, true).unwrap();
        space.write_user(STACK, &0x99u32.to_le_bytes()).unwrap();
        let fds: BTreeMap<u32, Arc<dyn File>> = BTreeMap::new();
        assert_eq!(
            handler(&space, &fds, STACK),
            SyscallOutcome::Return(-ENOSYS)
        );
    }

    #[test]
    fn test_racing_faults_on_one_page_keep_the_process() {
        let vm = small_vm(VmConfig { frames: 2 }, 2);
        let space = vm.create_address_space();
        space.add_zero_page(STACK, true).unwrap();
        space.add_zero_page(STACK + PAGE_FRAME_SIZE, false).unwrap();

        assert_eq!(page_fault(&space, STACK, false), None);
        assert_eq!(page_fault(&space, STACK + 4, true), None);
        assert_eq!(page_fault(&space, STACK + PAGE_FRAME_SIZE, false), None);
        assert_eq!(page_fault(&space, STACK + PAGE_FRAME_SIZE, false), None);
        assert!(!space.has_exited());
        assert_eq!(vm.stats().frames_allocated, 2);

        // Writing the read-only page is still fatal.
        assert_eq!(page_fault(&space, STACK + PAGE_FRAME_SIZE, true), Some(-1));
        assert!(space.has_exited());
    }

    #[test]
    fn test_page_fault_kills_on_bad_address() {
        let vm = small_vm(VmConfig { frames: 2 }, 2);
        let space = vm.create_address_space();
        space.add_zero_page(STACK, true).unwrap();
        assert_eq!(page_fault(&space, STACK + 8, false), None);
        assert_eq!(page_fault(&space, STACK + PAGE_FRAME_SIZE, false), Some(-1));
        assert!(space.has_exited());
        assert_eq!(vm.stats().frames_allocated, 0);
    }
}
