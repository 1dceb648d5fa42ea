//! AppImage format detection.
//!
//! An AppImage is an ELF runtime with a filesystem image appended directly
//! after its section header table:
//!
//! ```text
//! +-------------------+----------------------+------------------------+
//! | ELF header        | runtime code/data    | SquashFS or DwarFS     |
//! | (e_shoff, e_shnum,| ... section headers  | image                  |
//! |  e_shentsize)     |                      |                        |
//! +-------------------+----------------------+------------------------+
//!                                            ^ e_shoff + e_shnum * e_shentsize
//! ```
//!
//! Detection never fails hard: anything unexpected yields
//! [`DetectedFormat::Unknown`] and the caller tries every backend.
//!
//! - [`elf`]: ELF header parsing with explicit byte order
//! - [`squashfs`]: SquashFS superblock validation and scanning

pub mod elf;
pub mod squashfs;

use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;
use crate::io::{LocalFileReader, ReadAt};

use elf::ElfHeader;

/// Magic of the DwarFS image header.
pub const DWARFS_MAGIC: &[u8] = b"DWARFS";

/// Embedded filesystem formats this crate knows how to extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedFormat {
    Unknown,
    SquashFs,
    DwarFs,
}

impl DetectedFormat {
    /// Classify the bytes found at the payload offset.
    ///
    /// Signatures are checked in priority order: SquashFS, then DwarFS.
    pub fn from_magic(magic: &[u8]) -> Self {
        if magic.starts_with(squashfs::Superblock::MAGIC) {
            DetectedFormat::SquashFs
        } else if magic.starts_with(DWARFS_MAGIC) {
            DetectedFormat::DwarFs
        } else {
            DetectedFormat::Unknown
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DetectedFormat::Unknown => "Unknown",
            DetectedFormat::SquashFs => "SquashFS",
            DetectedFormat::DwarFs => "DwarFS",
        }
    }
}

impl fmt::Display for DetectedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of inspecting the archive header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub format: DetectedFormat,
    /// `None` when the ELF header could not be parsed.
    pub payload_offset: Option<u64>,
    pub appimage_type: Option<u8>,
}

impl Detection {
    fn undetermined() -> Self {
        Self {
            format: DetectedFormat::Unknown,
            payload_offset: None,
            appimage_type: None,
        }
    }
}

/// Work out the payload offset and embedded filesystem format.
pub async fn detect<R: ReadAt + ?Sized>(reader: &R) -> Result<Detection> {
    let mut header = [0u8; ElfHeader::SIZE];
    let n = reader.read_up_to_at(0, &mut header).await?;

    let elf = match ElfHeader::from_bytes(&header[..n]) {
        Ok(elf) => elf,
        Err(e) => {
            debug!("{e}");
            return Ok(Detection::undetermined());
        }
    };

    let Some(offset) = elf.payload_offset() else {
        debug!("section header geometry overflows");
        return Ok(Detection::undetermined());
    };
    debug!(
        "ELF payload at offset {} (shoff={}, shnum={}, shentsize={})",
        offset, elf.section_header_offset, elf.section_header_count, elf.section_header_entry_size
    );

    let mut magic = [0u8; 8];
    let n = reader.read_up_to_at(offset, &mut magic).await?;
    let format = if n < 4 {
        debug!("could not read magic bytes at offset {offset}");
        DetectedFormat::Unknown
    } else {
        DetectedFormat::from_magic(&magic[..n])
    };

    if format == DetectedFormat::Unknown {
        debug!(
            "unknown format at offset {offset} (magic: {:02x?})",
            &magic[..n.min(4)]
        );
    } else {
        debug!("{format} magic found at offset {offset}");
    }

    Ok(Detection {
        format,
        payload_offset: Some(offset),
        appimage_type: elf.appimage_type,
    })
}

/// The archive being thumbnailed, inspected once up front.
#[derive(Debug, Clone)]
pub struct ArchiveHandle {
    path: PathBuf,
    size: u64,
    detection: Detection,
}

impl ArchiveHandle {
    /// Open `path` and run format detection.
    ///
    /// Only failing to open or read the file is an error; an unrecognised
    /// layout still produces a handle with [`DetectedFormat::Unknown`].
    pub async fn open(path: &Path) -> Result<Self> {
        let reader = LocalFileReader::new(path)?;
        let detection = detect(&reader).await?;
        Ok(Self {
            path: path.to_path_buf(),
            size: reader.size(),
            detection,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn format(&self) -> DetectedFormat {
        self.detection.format
    }

    pub fn payload_offset(&self) -> Option<u64> {
        self.detection.payload_offset
    }

    pub fn appimage_type(&self) -> Option<u8> {
        self.detection.appimage_type
    }

    /// Open a fresh random-access reader over the archive.
    pub fn reader(&self) -> Result<LocalFileReader> {
        LocalFileReader::new(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::elf::tests::build_header;
    use super::elf::{ElfClass, Endianness};
    use super::*;
    use std::io::Write;

    fn write_archive(header: &[u8], offset: usize, payload: &[u8]) -> tempfile::NamedTempFile {
        let mut data = header.to_vec();
        data.resize(offset, 0);
        data.extend_from_slice(payload);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();
        file
    }

    #[tokio::test]
    async fn detects_squashfs_payload() {
        let header = build_header(ElfClass::Elf64, Endianness::Little, 1024, 64, 4);
        let file = write_archive(&header, 1024 + 256, b"hsqs\x10\x00\x00\x00");

        let handle = ArchiveHandle::open(file.path()).await.unwrap();
        assert_eq!(handle.format(), DetectedFormat::SquashFs);
        assert_eq!(handle.payload_offset(), Some(1280));
        assert_eq!(handle.appimage_type(), Some(2));
    }

    #[tokio::test]
    async fn detects_dwarfs_payload_big_endian() {
        let header = build_header(ElfClass::Elf32, Endianness::Big, 512, 40, 3);
        let file = write_archive(&header, 512 + 120, b"DWARFS\x02\x05");

        let handle = ArchiveHandle::open(file.path()).await.unwrap();
        assert_eq!(handle.format(), DetectedFormat::DwarFs);
        assert_eq!(handle.payload_offset(), Some(632));
    }

    #[tokio::test]
    async fn unknown_magic_keeps_offset() {
        let header = build_header(ElfClass::Elf64, Endianness::Little, 1024, 64, 1);
        let file = write_archive(&header, 1088, b"PK\x03\x04junk");

        let handle = ArchiveHandle::open(file.path()).await.unwrap();
        assert_eq!(handle.format(), DetectedFormat::Unknown);
        assert_eq!(handle.payload_offset(), Some(1088));
    }

    #[tokio::test]
    async fn payload_past_end_is_unknown() {
        let header = build_header(ElfClass::Elf64, Endianness::Little, 1 << 20, 64, 1);
        let file = write_archive(&header, 100, b"hs");

        let handle = ArchiveHandle::open(file.path()).await.unwrap();
        assert_eq!(handle.format(), DetectedFormat::Unknown);
    }

    #[tokio::test]
    async fn non_elf_has_no_offset() {
        let file = write_archive(b"not an elf file at all", 22, b"");
        let handle = ArchiveHandle::open(file.path()).await.unwrap();
        assert_eq!(handle.format(), DetectedFormat::Unknown);
        assert_eq!(handle.payload_offset(), None);
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ArchiveHandle::open(&dir.path().join("absent.AppImage"))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::ThumbnailError::Io(_)));
    }

    #[test]
    fn magic_priority() {
        assert_eq!(DetectedFormat::from_magic(b"hsqsDWARFS"), DetectedFormat::SquashFs);
        assert_eq!(DetectedFormat::from_magic(b"DWARFS"), DetectedFormat::DwarFs);
        assert_eq!(DetectedFormat::from_magic(b"DWAR"), DetectedFormat::Unknown);
    }
}
