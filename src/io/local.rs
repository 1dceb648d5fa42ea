use async_trait::async_trait;
use std::fs::File;
use std::path::{Path, PathBuf};

use super::ReadAt;
use crate::error::Result;

/// Positioned reads over an AppImage on disk.
///
/// The size is taken once at open time; reads never go past it, even if
/// the file grows underneath us.
#[derive(Debug)]
pub struct LocalFileReader {
    path: PathBuf,
    file: File,
    size: u64,
}

impl LocalFileReader {
    pub fn new(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file,
            size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ReadAt for LocalFileReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let remaining = self.size.saturating_sub(offset);
        let len = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        if len == 0 {
            return Ok(0);
        }
        let buf = &mut buf[..len];

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            Ok(self.file.read_at(buf, offset)?)
        }

        #[cfg(not(unix))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let mut file = &self.file;
            file.seek(SeekFrom::Start(offset))?;
            Ok(file.read(buf)?)
        }
    }

    fn size(&self) -> u64 {
        self.size
    }
}
