// syscall constants and types
// These are in a separate file so that both the kernel code and userspace libc can include/use them.

/// Identifier of a memory mapping, as returned by `mmap`.
pub type MapId = i32;

/// Returned by `mmap` when no mapping was created.
pub const MAP_FAILED: MapId = -1;

/// Exit status of a process the kernel terminated.
pub const KILLED_EXIT_STATUS: i32 = -1;

pub const STDIN_FILENO: u32 = 0;
pub const STDOUT_FILENO: u32 = 1;

pub const ENOSYS: isize = 38;

pub const SYS_EXIT: usize = 0x1;
pub const SYS_MMAP: usize = 0x5a;
pub const SYS_MUNMAP: usize = 0x5b;
