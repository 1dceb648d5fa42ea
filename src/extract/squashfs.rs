use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use tokio::sync::OnceCell;
use tracing::debug;

use super::command::CommandRunner;
use super::payload::Payload;
use super::tools::{Toolbox, UNSQUASHFS};
use super::{ExtractionBackend, entry_error};
use crate::detect::squashfs::locate_superblock;
use crate::detect::{ArchiveHandle, DetectedFormat};
use crate::error::{Result, ThumbnailError};
use crate::path::EntryPath;

/// Directory name `unsquashfs` prefixes to every listed path.
const LISTING_ROOT: &str = "squashfs-root";

/// Offset backend: `unsquashfs` reading the SquashFS image in place.
pub struct SquashfsBackend<'a> {
    archive: &'a ArchiveHandle,
    tools: &'a Toolbox,
    runner: CommandRunner,
    offset: OnceCell<Option<u64>>,
}

impl<'a> SquashfsBackend<'a> {
    pub fn new(archive: &'a ArchiveHandle, tools: &'a Toolbox, runner: CommandRunner) -> Self {
        Self {
            archive,
            tools,
            runner,
            offset: OnceCell::new(),
        }
    }

    fn tool(&self) -> Result<&'a Path> {
        self.tools
            .unsquashfs()
            .ok_or_else(|| ThumbnailError::ToolUnavailable(UNSQUASHFS.to_string()))
    }

    /// Locate the superblock now, so that [`ExtractionBackend::is_available`]
    /// also reflects whether there is anything for `unsquashfs` to read.
    ///
    /// Skipped when the tool is missing; the scan would be wasted.
    pub async fn find_superblock(&self) -> Result<bool> {
        if self.tools.unsquashfs().is_none() {
            return Ok(false);
        }
        Ok(self.located().await?.is_some())
    }

    async fn located(&self) -> Result<Option<u64>> {
        let offset = self
            .offset
            .get_or_try_init(|| async {
                let reader = self.archive.reader()?;
                locate_superblock(&reader, self.archive.payload_offset()).await
            })
            .await?;
        if offset.is_none() {
            debug!("no SquashFS superblock in {}", self.archive.path().display());
        }
        Ok(*offset)
    }

    /// Superblock offset, located on first use.
    async fn offset(&self) -> Result<u64> {
        self.located().await?.ok_or(ThumbnailError::FormatUndetermined)
    }

    /// `-o <offset> -p 1 <mode...> <archive>` followed by `trailing`.
    fn args(&self, offset: u64, mode: &str, trailing: Option<&EntryPath>) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-o".into(),
            offset.to_string().into(),
            "-p".into(),
            "1".into(),
            mode.into(),
            self.archive.path().into(),
        ];
        if let Some(entry) = trailing {
            args.push(entry.as_str().into());
        }
        args
    }

    /// `-cat` only handles regular files, so ask for a long listing of the
    /// entry and pull out the link target if it is a symlink.
    async fn symlink_target(&self, tool: &Path, offset: u64, entry: &EntryPath) -> Option<String> {
        let listing = self
            .runner
            .run(tool, self.args(offset, "-lls", Some(entry)))
            .await
            .ok()?;
        let target = parse_symlink_listing(&String::from_utf8_lossy(&listing), entry)?;
        debug!("'{entry}' is a symlink -> '{target}'");
        Some(target)
    }
}

#[async_trait]
impl ExtractionBackend for SquashfsBackend<'_> {
    fn name(&self) -> &'static str {
        UNSQUASHFS
    }

    fn format(&self) -> DetectedFormat {
        DetectedFormat::SquashFs
    }

    fn missing_tools(&self) -> Vec<&'static str> {
        match self.tools.unsquashfs() {
            Some(_) => Vec::new(),
            None => vec![UNSQUASHFS],
        }
    }

    /// The tool is present and a superblock search, if one ran, found one.
    fn is_available(&self) -> bool {
        self.missing_tools().is_empty() && !matches!(self.offset.get(), Some(None))
    }

    async fn extract(&self, entry: &EntryPath) -> Result<Payload> {
        let tool = self.tool()?;
        let offset = self.offset().await?;

        match self.runner.capture(tool, self.args(offset, "-cat", Some(entry))).await {
            Ok(bytes) => Ok(Payload::classify(bytes)),
            Err(e @ ThumbnailError::ToolTimedOut { .. }) => Err(e),
            Err(e) => match self.symlink_target(tool, offset, entry).await {
                Some(target) => Ok(Payload::classify(target.into_bytes())),
                None => Err(entry_error(e, entry)),
            },
        }
    }

    async fn list(&self) -> Result<Vec<EntryPath>> {
        let tool = self.tool()?;
        let offset = self.offset().await?;

        let output = self.runner.capture(tool, self.args(offset, "-ls", None)).await?;
        let paths = parse_listing(&String::from_utf8_lossy(&output));
        if paths.is_empty() {
            return Err(ThumbnailError::EmptyPayload(UNSQUASHFS.to_string()));
        }
        Ok(paths)
    }
}

/// Keep the lines under the synthetic root and strip it.
///
/// Banner lines ("Parallel unsquashfs: ...", inode counts) and the bare root
/// line are dropped.
fn parse_listing(output: &str) -> Vec<EntryPath> {
    output
        .lines()
        .filter_map(|line| line.trim_end().strip_prefix(LISTING_ROOT)?.strip_prefix('/'))
        .filter_map(EntryPath::new)
        .collect()
}

/// Find `entry` in `-lls` output and return its link target, if it is one.
///
/// Lines look like:
/// `lrwxrwxrwx user/group  12 2024-01-01 00:00 squashfs-root/.DirIcon -> app.png`
fn parse_symlink_listing(output: &str, entry: &EntryPath) -> Option<String> {
    let listed = format!("{LISTING_ROOT}/{entry}");
    output
        .lines()
        .filter(|line| line.starts_with('l'))
        .filter_map(|line| line.split_once(" -> "))
        .find(|(left, _)| left.ends_with(&listed))
        .map(|(_, target)| target.trim().to_string())
        .filter(|target| !target.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_strips_synthetic_root() {
        let output = "Parallel unsquashfs: Using 1 processor\n\
                      14 inodes (3 blocks) to write\n\
                      \n\
                      squashfs-root\n\
                      squashfs-root/.DirIcon\n\
                      squashfs-root/AppRun\n\
                      squashfs-root/myapp.desktop\n\
                      squashfs-root/usr/share/icons/hicolor/256x256/apps/myapp.png\n";

        let paths: Vec<String> = parse_listing(output).iter().map(ToString::to_string).collect();
        assert_eq!(
            paths,
            vec![
                ".DirIcon",
                "AppRun",
                "myapp.desktop",
                "usr/share/icons/hicolor/256x256/apps/myapp.png",
            ]
        );
    }

    #[test]
    fn listing_ignores_lookalike_prefixes() {
        let output = "squashfs-rootfs/x\nxsquashfs-root/y\nsquashfs-root/z\n";
        let paths: Vec<String> = parse_listing(output).iter().map(ToString::to_string).collect();
        assert_eq!(paths, vec!["z"]);
    }

    #[test]
    fn long_listing_yields_symlink_target() {
        let output = "Parallel unsquashfs: Using 1 processor\n\
                      1 inodes (0 blocks) to write\n\n\
                      lrwxrwxrwx root/root  28 2024-03-01 10:00 squashfs-root/.DirIcon -> usr/share/icons/app.png\n";
        let entry = EntryPath::new(".DirIcon").unwrap();
        assert_eq!(
            parse_symlink_listing(output, &entry).as_deref(),
            Some("usr/share/icons/app.png")
        );
    }

    #[test]
    fn regular_files_have_no_target() {
        let output = "-rw-r--r-- root/root 4096 2024-03-01 10:00 squashfs-root/.DirIcon\n";
        let entry = EntryPath::new(".DirIcon").unwrap();
        assert_eq!(parse_symlink_listing(output, &entry), None);

        let other = "lrwxrwxrwx root/root 8 2024-03-01 10:00 squashfs-root/app.png -> icon.png\n";
        assert_eq!(parse_symlink_listing(other, &entry), None);
    }
}
