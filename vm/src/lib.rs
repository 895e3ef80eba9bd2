//! Demand-paged virtual memory for KidneyOS user processes: the frame table
//! and its clock eviction, the swap store, per-process supplemental page
//! tables, the page fault loader, memory-mapped files and lazy ELF loading.

#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

pub mod block;
pub mod error;
pub mod fs;
pub mod mem;
pub mod paging;
pub mod sync;
pub mod user_program;

pub use error::{Result, VmError};
pub use mem::{AddressSpace, VirtualMemory, VmConfig};
