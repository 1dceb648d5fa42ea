//! Positioned reads over the archive for header and superblock probing.

mod local;

pub use local::LocalFileReader;

use async_trait::async_trait;

use crate::error::Result;

/// Random access to the bytes of an AppImage.
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read at most `buf.len()` bytes at `offset`; 0 means end of data.
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Length in bytes.
    fn size(&self) -> u64;

    /// Read until `buf` is full or the source ends, returning the byte count.
    async fn read_up_to_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_at(offset + filled as u64, &mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    /// Fill `buf` completely, returning `false` when the source ends first.
    ///
    /// Header and magic checks treat a short read as "not this format"
    /// rather than as an I/O error, so this reports it as a plain bool.
    async fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<bool> {
        Ok(self.read_up_to_at(offset, buf).await? == buf.len())
    }
}
