use async_trait::async_trait;
use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use super::command::CommandRunner;
use super::payload::Payload;
use super::tools::{DWARFSCK, DWARFSEXTRACT, Toolbox};
use super::{ExtractionBackend, entry_error};
use crate::detect::{ArchiveHandle, DetectedFormat};
use crate::error::{Result, ThumbnailError};
use crate::path::EntryPath;

/// Staging backend: `dwarfsextract` unpacking one entry into a temporary
/// directory.
///
/// `-O auto` lets the tool find the image offset on its own, so this
/// backend never needs the ELF arithmetic.
pub struct DwarfsBackend<'a> {
    archive: &'a ArchiveHandle,
    tools: &'a Toolbox,
    runner: CommandRunner,
    staging_root: Option<PathBuf>,
}

impl<'a> DwarfsBackend<'a> {
    pub fn new(archive: &'a ArchiveHandle, tools: &'a Toolbox, runner: CommandRunner) -> Self {
        Self {
            archive,
            tools,
            runner,
            staging_root: None,
        }
    }

    /// Create staging directories under `root` instead of the system
    /// temporary directory.
    pub fn with_staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = Some(root.into());
        self
    }
}

#[async_trait]
impl ExtractionBackend for DwarfsBackend<'_> {
    fn name(&self) -> &'static str {
        DWARFSEXTRACT
    }

    fn format(&self) -> DetectedFormat {
        DetectedFormat::DwarFs
    }

    fn missing_tools(&self) -> Vec<&'static str> {
        match self.tools.dwarfsextract() {
            Some(_) => Vec::new(),
            None => vec![DWARFSEXTRACT],
        }
    }

    async fn extract(&self, entry: &EntryPath) -> Result<Payload> {
        let tool = self
            .tools
            .dwarfsextract()
            .ok_or_else(|| ThumbnailError::ToolUnavailable(DWARFSEXTRACT.to_string()))?;

        // removed with everything under it when dropped, on every path out
        let mut builder = tempfile::Builder::new();
        builder.prefix("appimage-thumb-");
        let staging = match &self.staging_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        debug!("extracting '{entry}' into {}", staging.path().display());

        let args: [&OsStr; 9] = [
            OsStr::new("-i"),
            self.archive.path().as_os_str(),
            OsStr::new("-O"),
            OsStr::new("auto"),
            OsStr::new("--pattern"),
            OsStr::new(entry.as_str()),
            OsStr::new("-o"),
            staging.path().as_os_str(),
            OsStr::new("--log-level=error"),
        ];
        self.runner
            .run(tool, args)
            .await
            .map_err(|e| entry_error(e, entry))?;

        let bytes = read_staged(&staging.path().join(entry.as_str()), entry).await?;
        if bytes.is_empty() {
            return Err(ThumbnailError::EmptyPayload(DWARFSEXTRACT.to_string()));
        }
        Ok(Payload::classify(bytes))
    }

    async fn list(&self) -> Result<Vec<EntryPath>> {
        let tool = self
            .tools
            .dwarfsck()
            .ok_or_else(|| ThumbnailError::ToolUnavailable(DWARFSCK.to_string()))?;

        let args: [&OsStr; 5] = [
            OsStr::new("-i"),
            self.archive.path().as_os_str(),
            OsStr::new("-O"),
            OsStr::new("auto"),
            OsStr::new("--list"),
        ];
        let output = self.runner.capture(tool, args).await?;
        Ok(parse_listing(&String::from_utf8_lossy(&output)))
    }
}

/// Read what the tool staged for `entry`.
///
/// A symlink is returned as its target text rather than followed, so that
/// the resolver applies the same bounded pointer chase as for text
/// pointers.
async fn read_staged(path: &Path, entry: &EntryPath) -> Result<Vec<u8>> {
    let metadata = match fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("'{entry}' was not staged by {DWARFSEXTRACT}");
            return Err(ThumbnailError::EntryNotFound(entry.to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    if metadata.file_type().is_symlink() {
        let target = fs::read_link(path).await?;
        debug!("'{entry}' is a symlink -> '{}'", target.display());
        return Ok(target.to_string_lossy().into_owned().into_bytes());
    }
    if metadata.is_file() {
        return Ok(fs::read(path).await?);
    }
    Err(ThumbnailError::EntryNotFound(entry.to_string()))
}

fn parse_listing(output: &str) -> Vec<EntryPath> {
    output.lines().filter_map(EntryPath::new).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_is_normalized() {
        let paths: Vec<String> = parse_listing("\n.DirIcon\n/usr/bin/app\n./myapp.desktop\n\n")
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(paths, vec![".DirIcon", "usr/bin/app", "myapp.desktop"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn staged_symlink_is_returned_as_target_text() {
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink("usr/share/icons/app.svg", dir.path().join(".DirIcon")).unwrap();

        let entry = EntryPath::new(".DirIcon").unwrap();
        let bytes = read_staged(&dir.path().join(".DirIcon"), &entry).await.unwrap();
        assert_eq!(bytes, b"usr/share/icons/app.svg");
    }

    #[tokio::test]
    async fn missing_or_directory_entry_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("usr")).unwrap();

        let entry = EntryPath::new("usr").unwrap();
        assert!(matches!(
            read_staged(&dir.path().join("usr"), &entry).await,
            Err(ThumbnailError::EntryNotFound(_))
        ));
        assert!(matches!(
            read_staged(&dir.path().join("absent"), &entry).await,
            Err(ThumbnailError::EntryNotFound(_))
        ));
    }
}
