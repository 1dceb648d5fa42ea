//! # appimage-thumbnailer
//!
//! Render the icon embedded in an AppImage as a square PNG thumbnail.
//!
//! An AppImage is an ELF runtime followed by a SquashFS or DwarFS image.
//! This library finds where that image starts, pulls single entries out of
//! it with the format's own tools (`unsquashfs`, `dwarfsextract`) and
//! follows `.DirIcon` to the actual icon, falling back to the desktop
//! entry's `Icon=` name when `.DirIcon` leads nowhere.
//!
//! ## Pipeline
//!
//! - [`detect`]: ELF header and filesystem magic
//! - [`extract`]: the two extraction backends behind one trait
//! - [`resolve`]: `.DirIcon` pointer chase and desktop-entry fallback
//! - [`render`]: SVG and raster decoding onto a fixed-size canvas
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use appimage_thumbnailer::{ArchiveHandle, CommandRunner, Toolbox, thumbnail};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let archive = ArchiveHandle::open(Path::new("MyApp.AppImage")).await?;
//!     let tools = Toolbox::new(Path::new("/usr/lib/appimage-thumbnailer"));
//!
//!     let icon = thumbnail(&archive, &tools, CommandRunner::default(), 128).await?;
//!     icon.write_to(Path::new("MyApp.png"))?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod detect;
pub mod error;
pub mod extract;
pub mod io;
pub mod path;
pub mod render;
pub mod resolve;

pub use cli::Cli;
pub use detect::{ArchiveHandle, DetectedFormat};
pub use error::{Result, ThumbnailError};
pub use extract::{
    BackendChain, CommandRunner, DwarfsBackend, ExtractionBackend, Payload, SquashfsBackend,
    Toolbox,
};
pub use io::{LocalFileReader, ReadAt};
pub use path::EntryPath;
pub use render::Thumbnail;
pub use resolve::IconResolver;

use tracing::{debug, warn};

/// Resolve and render the icon of `archive` at `size` pixels.
///
/// Both backends are always tried; the detected format only decides which
/// goes first. The offset backend counts as unusable when the archive holds
/// no SquashFS superblock. Fails with [`ThumbnailError::ToolUnavailable`]
/// naming every missing tool when neither backend can run.
pub async fn thumbnail(
    archive: &ArchiveHandle,
    tools: &Toolbox,
    runner: CommandRunner,
    size: u32,
) -> Result<Thumbnail> {
    let squashfs = SquashfsBackend::new(archive, tools, runner);
    squashfs.find_superblock().await?;

    let chain = BackendChain::new(
        archive.format(),
        vec![
            Box::new(squashfs) as Box<dyn ExtractionBackend + '_>,
            Box::new(DwarfsBackend::new(archive, tools, runner)),
        ],
    );
    if !chain.is_available() {
        let missing = chain.missing_tools().join(", ");
        warn!("{} AppImage detected but {missing} not available", archive.format());
        return Err(ThumbnailError::ToolUnavailable(missing));
    }
    debug!(
        "{} ({} bytes, AppImage type {}): {} payload",
        archive.path().display(),
        archive.size(),
        archive
            .appimage_type()
            .map_or_else(|| "?".to_string(), |t| t.to_string()),
        archive.format()
    );

    IconResolver::new(&chain, size).resolve().await
}
