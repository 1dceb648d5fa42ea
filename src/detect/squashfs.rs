//! SquashFS superblock validation and location.
//!
//! The ELF section-header arithmetic is usually right, but some runtimes
//! append padding or signatures, so the offset backend confirms the
//! superblock itself before handing an offset to `unsquashfs`.

use byteorder::{LittleEndian, ReadBytesExt};
use memchr::memmem;
use std::io::Cursor;
use tracing::debug;

use crate::error::{Result, ThumbnailError};
use crate::io::ReadAt;

/// Bytes read per step of the streaming scan.
const SCAN_CHUNK: usize = 64 * 1024;

const MIN_BLOCK_SIZE: u32 = 4 * 1024;
const MAX_BLOCK_SIZE: u32 = 1024 * 1024;

/// SquashFS compression ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Lzma,
    Lzo,
    Xz,
    Lz4,
    Zstd,
}

impl Compression {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Compression::Gzip),
            2 => Some(Compression::Lzma),
            3 => Some(Compression::Lzo),
            4 => Some(Compression::Xz),
            5 => Some(Compression::Lz4),
            6 => Some(Compression::Zstd),
            _ => None,
        }
    }
}

/// SquashFS 4.0 superblock - 96 bytes, always little-endian
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    pub inode_count: u32,
    pub block_size: u32,
    pub compression: Compression,
    pub version_major: u16,
    pub version_minor: u16,
    pub bytes_used: u64,
}

impl Superblock {
    pub const MAGIC: &'static [u8] = b"hsqs";
    pub const SIZE: usize = 96;

    /// Parse and sanity-check a superblock.
    ///
    /// The magic is four printable bytes and shows up inside compressed
    /// data often enough that the fields after it must also make sense.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::MAGIC {
            return Err(invalid("missing magic"));
        }

        let mut cursor = Cursor::new(&data[4..]);
        let inode_count = cursor.read_u32::<LittleEndian>()?;
        let _mod_time = cursor.read_u32::<LittleEndian>()?;
        let block_size = cursor.read_u32::<LittleEndian>()?;
        let _fragment_count = cursor.read_u32::<LittleEndian>()?;
        let compression = cursor.read_u16::<LittleEndian>()?;
        let block_log = cursor.read_u16::<LittleEndian>()?;
        let _flags = cursor.read_u16::<LittleEndian>()?;
        let _id_count = cursor.read_u16::<LittleEndian>()?;
        let version_major = cursor.read_u16::<LittleEndian>()?;
        let version_minor = cursor.read_u16::<LittleEndian>()?;
        let _root_inode = cursor.read_u64::<LittleEndian>()?;
        let bytes_used = cursor.read_u64::<LittleEndian>()?;

        if !block_size.is_power_of_two() || !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size)
        {
            return Err(invalid("implausible block size"));
        }
        if u32::from(block_log) != block_size.trailing_zeros() {
            return Err(invalid("block_log does not match block size"));
        }
        let compression =
            Compression::from_u16(compression).ok_or_else(|| invalid("unknown compression id"))?;
        if version_major != 4 || version_minor != 0 {
            return Err(invalid("unsupported version"));
        }

        Ok(Self {
            inode_count,
            block_size,
            compression,
            version_major,
            version_minor,
            bytes_used,
        })
    }
}

fn invalid(reason: &str) -> ThumbnailError {
    ThumbnailError::NotAnArchive(format!("invalid SquashFS superblock: {reason}"))
}

/// Check for a valid superblock at exactly `offset`.
pub async fn superblock_at<R: ReadAt + ?Sized>(reader: &R, offset: u64) -> Result<Option<Superblock>> {
    let mut buf = [0u8; Superblock::SIZE];
    if !reader.read_exact_at(offset, &mut buf).await? {
        return Ok(None);
    }
    match Superblock::from_bytes(&buf) {
        Ok(sb) if offset.saturating_add(sb.bytes_used) <= reader.size() => Ok(Some(sb)),
        Ok(_) => {
            debug!("superblock at {offset} claims more bytes than the file holds");
            Ok(None)
        }
        Err(_) => Ok(None),
    }
}

/// Find the SquashFS image inside the file.
///
/// `hint` (normally the ELF payload offset) is tried first; otherwise the
/// whole file is scanned front to back and the first candidate that
/// validates wins.
pub async fn locate_superblock<R: ReadAt + ?Sized>(reader: &R, hint: Option<u64>) -> Result<Option<u64>> {
    if let Some(offset) = hint {
        if superblock_at(reader, offset).await?.is_some() {
            debug!("SquashFS superblock confirmed at ELF payload offset {offset}");
            return Ok(Some(offset));
        }
        debug!("no valid SquashFS superblock at ELF payload offset {offset}, scanning");
    }

    let finder = memmem::Finder::new(Superblock::MAGIC);
    let overlap = Superblock::MAGIC.len() - 1;
    let mut chunk = vec![0u8; SCAN_CHUNK];
    let mut base = 0u64;

    while base < reader.size() {
        let n = reader.read_up_to_at(base, &mut chunk).await?;
        if n == 0 {
            break;
        }
        for pos in finder.find_iter(&chunk[..n]) {
            let candidate = base + pos as u64;
            if superblock_at(reader, candidate).await?.is_some() {
                debug!("SquashFS superblock found by scan at offset {candidate}");
                return Ok(Some(candidate));
            }
        }
        if n <= overlap {
            break;
        }
        base += (n - overlap) as u64;
    }

    Ok(None)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::io::LocalFileReader;
    use byteorder::WriteBytesExt;
    use std::io::Write;

    pub(crate) fn build_superblock(block_size: u32, compression: u16, bytes_used: u64) -> Vec<u8> {
        let mut data = Vec::with_capacity(Superblock::SIZE);
        data.extend_from_slice(Superblock::MAGIC);
        data.write_u32::<LittleEndian>(12).unwrap(); // inodes
        data.write_u32::<LittleEndian>(0).unwrap(); // mkfs time
        data.write_u32::<LittleEndian>(block_size).unwrap();
        data.write_u32::<LittleEndian>(1).unwrap(); // fragments
        data.write_u16::<LittleEndian>(compression).unwrap();
        data.write_u16::<LittleEndian>(block_size.trailing_zeros() as u16).unwrap();
        data.write_u16::<LittleEndian>(0).unwrap(); // flags
        data.write_u16::<LittleEndian>(1).unwrap(); // ids
        data.write_u16::<LittleEndian>(4).unwrap();
        data.write_u16::<LittleEndian>(0).unwrap();
        data.write_u64::<LittleEndian>(0).unwrap(); // root inode
        data.write_u64::<LittleEndian>(bytes_used).unwrap();
        data.resize(Superblock::SIZE, 0);
        data
    }

    #[test]
    fn accepts_plausible_superblock() {
        let sb = Superblock::from_bytes(&build_superblock(128 * 1024, 4, 4096)).unwrap();
        assert_eq!(sb.block_size, 128 * 1024);
        assert_eq!(sb.compression, Compression::Xz);
        assert_eq!(sb.bytes_used, 4096);
    }

    #[test]
    fn rejects_implausible_fields() {
        assert!(Superblock::from_bytes(&build_superblock(100_000, 1, 0)).is_err());
        assert!(Superblock::from_bytes(&build_superblock(2 * 1024 * 1024, 1, 0)).is_err());
        assert!(Superblock::from_bytes(&build_superblock(4096, 9, 0)).is_err());

        let mut wrong_version = build_superblock(4096, 1, 0);
        wrong_version[28] = 3;
        assert!(Superblock::from_bytes(&wrong_version).is_err());

        let mut wrong_log = build_superblock(4096, 1, 0);
        wrong_log[22] = 11;
        assert!(Superblock::from_bytes(&wrong_log).is_err());
    }

    #[tokio::test]
    async fn scan_skips_decoy_magic() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut data = vec![0u8; 200_000];
        // decoy inside "compressed" data, then the real superblock
        data[70_000..70_004].copy_from_slice(b"hsqs");
        let real = 150_000usize;
        data[real..real + Superblock::SIZE].copy_from_slice(&build_superblock(131_072, 1, 1000));
        file.write_all(&data).unwrap();

        let reader = LocalFileReader::new(file.path()).unwrap();
        assert_eq!(locate_superblock(&reader, None).await.unwrap(), Some(real as u64));
        assert_eq!(
            locate_superblock(&reader, Some(70_000)).await.unwrap(),
            Some(real as u64)
        );
        assert_eq!(
            locate_superblock(&reader, Some(real as u64)).await.unwrap(),
            Some(real as u64)
        );
    }

    #[tokio::test]
    async fn scan_finds_magic_across_chunk_boundary() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut data = vec![0u8; SCAN_CHUNK * 2];
        let at = SCAN_CHUNK - 2;
        data[at..at + Superblock::SIZE].copy_from_slice(&build_superblock(4096, 6, 10));
        file.write_all(&data).unwrap();

        let reader = LocalFileReader::new(file.path()).unwrap();
        assert_eq!(locate_superblock(&reader, None).await.unwrap(), Some(at as u64));
    }

    #[tokio::test]
    async fn oversized_image_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&build_superblock(4096, 1, 1 << 40)).unwrap();

        let reader = LocalFileReader::new(file.path()).unwrap();
        assert_eq!(locate_superblock(&reader, Some(0)).await.unwrap(), None);
    }
}
