use nom::bytes::complete::{tag, take};
use nom::combinator::map_opt;
use nom::number::complete::{u16, u32, u8};
use nom::number::Endianness;
use nom::IResult;

pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// Size of an ELF32 file header.
pub const ELF_HEADER_SIZE: usize = 52;
/// Size of an ELF32 program header.
pub const PROGRAM_HEADER_SIZE: usize = 32;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ElfEndianness {
    Little,
    Big,
}

impl ElfEndianness {
    pub fn to_nom(self) -> Endianness {
        match self {
            ElfEndianness::Little => Endianness::Little,
            ElfEndianness::Big => Endianness::Big,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ElfUsage {
    Relocatable,
    Executable,
    Shared,
    Core,
}

// Common Architectures from https://wiki.osdev.org/ELF
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ElfArchitecture {
    Generic,
    Sparc,
    Mips,
    PowerPC,
    RiscV,
    Ia64,
    X86,
    X8664,
    Arm,
    Arm64,
}

// Strictly 32-bit ELFs.
#[derive(Copy, Clone, Debug)]
pub struct ElfHeader {
    pub endianness: ElfEndianness,
    pub header_version: u8,
    pub usage: ElfUsage,
    pub architecture: ElfArchitecture,
    pub elf_version: u32,
    pub program_entry: u32,
    pub program_headers_offset: u32,
    pub program_header_entry_size: u16,
    pub program_header_count: u16,
}

impl ElfHeader {
    pub fn parse(bytes: &[u8]) -> IResult<&[u8], ElfHeader> {
        let (bytes, _) = tag(&ELF_MAGIC[..])(bytes)?;

        // Elf Bit Width, we don't parse 64-bits ELF binaries.
        let (bytes, _) = tag(&[1u8][..])(bytes)?;

        let (bytes, endianness) = map_opt(u8, |value| match value {
            1 => Some(ElfEndianness::Little),
            2 => Some(ElfEndianness::Big),
            _ => None,
        })(bytes)?;

        let endian = endianness.to_nom();

        let (bytes, header_version) = u8(bytes)?;
        // ABI, ABI version and padding.
        let (bytes, _) = take(9usize)(bytes)?;

        let (bytes, usage) = map_opt(u16(endian), |value| match value {
            1 => Some(ElfUsage::Relocatable),
            2 => Some(ElfUsage::Executable),
            3 => Some(ElfUsage::Shared),
            4 => Some(ElfUsage::Core),
            _ => None,
        })(bytes)?;

        let (bytes, architecture) = map_opt(u16(endian), |value| match value {
            0x00 => Some(ElfArchitecture::Generic),
            0x02 => Some(ElfArchitecture::Sparc),
            0x03 => Some(ElfArchitecture::X86),
            0x08 => Some(ElfArchitecture::Mips),
            0x14 => Some(ElfArchitecture::PowerPC),
            0x28 => Some(ElfArchitecture::Arm),
            0x32 => Some(ElfArchitecture::Ia64),
            0x3E => Some(ElfArchitecture::X8664),
            0xB7 => Some(ElfArchitecture::Arm64),
            0xF3 => Some(ElfArchitecture::RiscV),
            _ => None,
        })(bytes)?;

        let (bytes, elf_version) = u32(endian)(bytes)?;
        let (bytes, program_entry) = u32(endian)(bytes)?;
        let (bytes, program_headers_offset) = u32(endian)(bytes)?;
        // Section header offset, flags and header size.
        let (bytes, _) = take(10usize)(bytes)?;
        let (bytes, program_header_entry_size) = u16(endian)(bytes)?;
        let (bytes, program_header_count) = u16(endian)(bytes)?;
        // Section header size, count and string table index.
        let (bytes, _) = take(6usize)(bytes)?;

        Ok((
            bytes,
            ElfHeader {
                endianness,
                header_version,
                usage,
                architecture,
                elf_version,
                program_entry,
                program_headers_offset,
                program_header_entry_size,
                program_header_count,
            },
        ))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ElfProgramType {
    Ignore,
    Load,
    Dynamic,
    Interpret,
    Note,
    Shlib,
    ProgramHeaders,
    OsSpecific(u32),
}

/// A program header. The segment contents stay in the file.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ElfProgramHeader {
    pub program_type: ElfProgramType,
    pub offset: u32,
    pub virtual_address: u32,
    pub file_size: u32,
    pub memory_size: u32,
    pub executable: bool,
    pub writable: bool,
    pub readable: bool,
    pub alignment: u32,
}

impl ElfProgramHeader {
    pub fn parse(bytes: &[u8], endian: Endianness) -> IResult<&[u8], Self> {
        let (bytes, program_type) = map_opt(u32(endian), |value| match value {
            0 => Some(ElfProgramType::Ignore),
            1 => Some(ElfProgramType::Load),
            2 => Some(ElfProgramType::Dynamic),
            3 => Some(ElfProgramType::Interpret),
            4 => Some(ElfProgramType::Note),
            5 => Some(ElfProgramType::Shlib),
            6 => Some(ElfProgramType::ProgramHeaders),
            0x60000000.. => Some(ElfProgramType::OsSpecific(value)), // OS Specific Headers
            _ => None,
        })(bytes)?;

        let (bytes, offset) = u32(endian)(bytes)?;
        let (bytes, virtual_address) = u32(endian)(bytes)?;
        let (bytes, _physical_address) = u32(endian)(bytes)?;
        let (bytes, file_size) = u32(endian)(bytes)?;
        let (bytes, memory_size) = u32(endian)(bytes)?;
        let (bytes, flags) = u32(endian)(bytes)?;
        let (bytes, alignment) = u32(endian)(bytes)?;

        Ok((
            bytes,
            ElfProgramHeader {
                program_type,
                offset,
                virtual_address,
                file_size,
                memory_size,
                executable: flags & 1 != 0,
                writable: flags & 2 != 0,
                readable: flags & 4 != 0,
                alignment,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_64_bit() {
        let mut bytes = [0; ELF_HEADER_SIZE];
        bytes[..5].copy_from_slice(&[0x7F, b'E', b'L', b'F', 2]);
        assert!(ElfHeader::parse(&bytes).is_err());
    }

    #[test]
    fn test_program_header_flags() {
        let mut bytes = [0; PROGRAM_HEADER_SIZE];
        bytes[0] = 1;
        bytes[4..8].copy_from_slice(&0x1000u32.to_le_bytes());
        bytes[8..12].copy_from_slice(&0x0804_8000u32.to_le_bytes());
        bytes[16..20].copy_from_slice(&0x20u32.to_le_bytes());
        bytes[20..24].copy_from_slice(&0x40u32.to_le_bytes());
        bytes[24..28].copy_from_slice(&6u32.to_le_bytes());

        let (rest, header) = ElfProgramHeader::parse(&bytes, Endianness::Little).unwrap();
        assert!(rest.is_empty());
        assert_eq!(header.program_type, ElfProgramType::Load);
        assert_eq!(header.offset, 0x1000);
        assert_eq!(header.virtual_address, 0x0804_8000);
        assert_eq!((header.file_size, header.memory_size), (0x20, 0x40));
        assert!(header.writable && header.readable && !header.executable);
    }
}
