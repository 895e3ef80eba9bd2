use super::elf::{
    ElfArchitecture, ElfEndianness, ElfHeader, ElfProgramHeader, ElfProgramType, ElfUsage,
    ELF_HEADER_SIZE, PROGRAM_HEADER_SIZE,
};
use crate::error::VmError;
use crate::fs::{self, File};
use crate::mem::{AddressSpace, FileExtent};
use alloc::sync::Arc;
use alloc::vec;
use core::cmp::min;
use kidneyos_shared::mem::{is_user_vaddr, page_round_up, OFFSET, PAGE_FRAME_SIZE, PAGE_MASK};
use log::debug;

/// Initial user stack pointer. The stack grows down from here.
pub const USER_STACK_TOP: usize = OFFSET;

/// Upper bound on program headers, so a corrupt count cannot make us read an
/// absurd amount.
const MAX_PROGRAM_HEADERS: u16 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    Malformed,
    UnsupportedEndianess,
    UnsupportedVersion,
    UnsupportedType,
    UnsupportedMachine,
    SegmentError(ElfSegmentError),
    Io(fs::Error),
    Vm(VmError),
}

// Error types that will arise when we try to validate segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfSegmentError {
    DifferentPageOffset,
    OffsetOutOfRange,
    MemSizeLesserThanFileSize,
    EmptyMemSize,
    VMRegionOutOfRange,
    VMRegionWrapAround,
    PageZeroMapping,
}

impl From<fs::Error> for ElfError {
    fn from(e: fs::Error) -> Self {
        ElfError::Io(e)
    }
}

impl From<VmError> for ElfError {
    fn from(e: VmError) -> Self {
        ElfError::Vm(e)
    }
}

/// The executable image registered by [`load_elf`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedImage {
    pub entry: usize,
    pub stack_top: usize,
}

fn verify_elf_header(header: &ElfHeader) -> Result<(), ElfError> {
    if header.endianness != ElfEndianness::Little {
        return Err(ElfError::UnsupportedEndianess);
    }
    if header.header_version != 1 || header.elf_version != 1 {
        return Err(ElfError::UnsupportedVersion);
    }
    if header.usage != ElfUsage::Executable {
        return Err(ElfError::UnsupportedType);
    }
    if header.architecture != ElfArchitecture::X86 {
        return Err(ElfError::UnsupportedMachine);
    }
    if usize::from(header.program_header_entry_size) != PROGRAM_HEADER_SIZE
        || header.program_header_count > MAX_PROGRAM_HEADERS
    {
        return Err(ElfError::Malformed);
    }
    Ok(())
}

fn validate_segment(phdr: &ElfProgramHeader, file_len: u64) -> Result<(), ElfSegmentError> {
    let offset = phdr.offset as usize;
    let vaddr = phdr.virtual_address as usize;

    // p_offset and p_vaddr must have the same page offset.
    if offset & PAGE_MASK != vaddr & PAGE_MASK {
        return Err(ElfSegmentError::DifferentPageOffset);
    }

    // p_offset must point within FILE.
    if u64::from(phdr.offset) > file_len {
        return Err(ElfSegmentError::OffsetOutOfRange);
    }

    // p_memsz must be at least as big as p_filesz.
    if phdr.memory_size < phdr.file_size {
        return Err(ElfSegmentError::MemSizeLesserThanFileSize);
    }

    // The segment must not be empty.
    if phdr.memory_size == 0 {
        return Err(ElfSegmentError::EmptyMemSize);
    }

    // The virtual memory region must both start and end within the
    // user address space range.
    if vaddr >= OFFSET {
        return Err(ElfSegmentError::VMRegionOutOfRange);
    }

    // The region cannot "wrap around" across the kernel virtual
    // address space.
    let end = phdr
        .virtual_address
        .checked_add(phdr.memory_size)
        .ok_or(ElfSegmentError::VMRegionWrapAround)?;
    if end as usize - 1 >= OFFSET {
        return Err(ElfSegmentError::VMRegionOutOfRange);
    }

    // Disallow mapping page 0.
    if !is_user_vaddr(vaddr) {
        return Err(ElfSegmentError::PageZeroMapping);
    }

    Ok(())
}

/// Register the pages of a `PT_LOAD` segment. Pages that hold file bytes load
/// them on first touch and zero the rest; pages past the file bytes are
/// zero-filled.
fn load_segment(
    space: &AddressSpace,
    file: &Arc<dyn File>,
    phdr: &ElfProgramHeader,
) -> Result<(), ElfError> {
    let page_offset = phdr.virtual_address as usize & PAGE_MASK;
    let mut page = phdr.virtual_address as usize & !PAGE_MASK;
    let mut file_offset = u64::from(phdr.offset) & !(PAGE_MASK as u64);

    let total = page_round_up(page_offset + phdr.memory_size as usize)
        .ok_or(ElfError::SegmentError(ElfSegmentError::VMRegionWrapAround))?;
    let mut read_bytes = if phdr.file_size > 0 {
        page_offset + phdr.file_size as usize
    } else {
        0
    };
    let mut zero_bytes = total - read_bytes;

    while read_bytes > 0 || zero_bytes > 0 {
        let page_read = min(read_bytes, PAGE_FRAME_SIZE);
        if page_read > 0 {
            let extent = FileExtent::new(Arc::clone(file), file_offset, page_read);
            space.add_file_page(page, extent, phdr.writable)?;
        } else {
            space.add_zero_page(page, phdr.writable)?;
        }

        read_bytes -= page_read;
        zero_bytes -= PAGE_FRAME_SIZE - page_read;
        page += PAGE_FRAME_SIZE;
        file_offset += page_read as u64;
    }
    Ok(())
}

/// Register the initial stack page just below [`USER_STACK_TOP`].
pub fn setup_stack(space: &AddressSpace) -> Result<usize, VmError> {
    space.add_zero_page(USER_STACK_TOP - PAGE_FRAME_SIZE, true)?;
    Ok(USER_STACK_TOP)
}

/// Prepare `space` to run the executable in `file`.
///
/// Only the headers are read now. Segment pages are registered to load
/// lazily, and the stack page is registered as zero-filled.
pub fn load_elf(space: &AddressSpace, file: &Arc<dyn File>) -> Result<LoadedImage, ElfError> {
    let files = space.vm().files();
    let file_len = files.length(&**file)?;

    let mut header_bytes = [0; ELF_HEADER_SIZE];
    files
        .read_exact_at(&**file, 0, &mut header_bytes)
        .map_err(|_| ElfError::Malformed)?;
    let (_, header) = ElfHeader::parse(&header_bytes).map_err(|_| ElfError::Malformed)?;
    verify_elf_header(&header)?;

    let mut table = vec![0; usize::from(header.program_header_count) * PROGRAM_HEADER_SIZE];
    files
        .read_exact_at(&**file, u64::from(header.program_headers_offset), &mut table)
        .map_err(|_| ElfError::Malformed)?;

    for bytes in table.chunks_exact(PROGRAM_HEADER_SIZE) {
        let (_, phdr) = ElfProgramHeader::parse(bytes, header.endianness.to_nom())
            .map_err(|_| ElfError::Malformed)?;
        match phdr.program_type {
            ElfProgramType::Load => {
                validate_segment(&phdr, file_len).map_err(ElfError::SegmentError)?;
                load_segment(space, file, &phdr)?;
            }
            ElfProgramType::Dynamic | ElfProgramType::Interpret | ElfProgramType::Shlib => {
                return Err(ElfError::UnsupportedType);
            }
            _ => {}
        }
    }

    let stack_top = setup_stack(space)?;
    debug!(
        "pid {}: loaded executable, entry {:#x}, {} pages",
        space.pid(),
        header.program_entry,
        space.page_count()
    );
    Ok(LoadedImage {
        entry: header.program_entry as usize,
        stack_top,
    })
}
