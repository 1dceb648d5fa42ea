use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::error::{Result, ThumbnailError};

/// ELF class (`e_ident[EI_CLASS]`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    Elf32,
    Elf64,
}

/// ELF data encoding (`e_ident[EI_DATA]`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

/// The subset of the ELF file header needed to find the appended payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfHeader {
    pub class: ElfClass,
    pub endianness: Endianness,
    /// AppImage type from `e_ident[8..11]` = `"AI"` + type byte, if present.
    pub appimage_type: Option<u8>,
    pub section_header_offset: u64,
    pub section_header_entry_size: u16,
    pub section_header_count: u16,
}

impl ElfHeader {
    pub const MAGIC: &'static [u8] = b"\x7fELF";
    pub const APPIMAGE_MAGIC: &'static [u8] = b"AI";
    /// Large enough for the ELF64 header; ELF32 needs only 52 bytes.
    pub const SIZE: usize = 64;
    pub const ELF32_SIZE: usize = 52;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 16 {
            return Err(not_elf("header shorter than e_ident"));
        }
        if &data[0..4] != Self::MAGIC {
            return Err(not_elf("missing ELF magic"));
        }

        let class = match data[4] {
            1 => ElfClass::Elf32,
            2 => ElfClass::Elf64,
            other => return Err(not_elf(&format!("unknown ELF class {other}"))),
        };
        let endianness = match data[5] {
            1 => Endianness::Little,
            2 => Endianness::Big,
            other => return Err(not_elf(&format!("unknown ELF data encoding {other}"))),
        };

        let appimage_type = (&data[8..10] == Self::APPIMAGE_MAGIC).then_some(data[10]);

        let needed = match class {
            ElfClass::Elf32 => Self::ELF32_SIZE,
            ElfClass::Elf64 => Self::SIZE,
        };
        if data.len() < needed {
            return Err(not_elf("truncated ELF header"));
        }

        let (section_header_offset, section_header_entry_size, section_header_count) =
            match endianness {
                Endianness::Little => read_section_geometry::<LittleEndian>(data, class)?,
                Endianness::Big => read_section_geometry::<BigEndian>(data, class)?,
            };

        Ok(Self {
            class,
            endianness,
            appimage_type,
            section_header_offset,
            section_header_entry_size,
            section_header_count,
        })
    }

    /// First byte past the section header table, where the filesystem image
    /// is appended.
    pub fn payload_offset(&self) -> Option<u64> {
        let table_size =
            u64::from(self.section_header_count) * u64::from(self.section_header_entry_size);
        self.section_header_offset.checked_add(table_size)
    }
}

/// Read `(e_shoff, e_shentsize, e_shnum)` at their class-specific offsets.
fn read_section_geometry<B: ByteOrder>(data: &[u8], class: ElfClass) -> Result<(u64, u16, u16)> {
    let (shoff_at, shentsize_at) = match class {
        ElfClass::Elf32 => (32, 46),
        ElfClass::Elf64 => (40, 58),
    };

    let mut cursor = Cursor::new(data);
    cursor.set_position(shoff_at);
    let shoff = match class {
        ElfClass::Elf32 => u64::from(cursor.read_u32::<B>()?),
        ElfClass::Elf64 => cursor.read_u64::<B>()?,
    };

    // e_shnum directly follows e_shentsize in both classes
    cursor.set_position(shentsize_at);
    let shentsize = cursor.read_u16::<B>()?;
    let shnum = cursor.read_u16::<B>()?;

    Ok((shoff, shentsize, shnum))
}

fn not_elf(reason: &str) -> ThumbnailError {
    ThumbnailError::NotAnArchive(reason.to_string())
}
