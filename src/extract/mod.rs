//! Entry extraction through external filesystem tools.
//!
//! Nothing here unpacks the whole image. Each call asks one external tool
//! for one entry (or for the path listing) and returns the bytes.
//!
//! ## Backends
//!
//! - [`SquashfsBackend`]: the offset backend. Points `unsquashfs` at the
//!   SquashFS superblock inside the AppImage and streams a single file to
//!   stdout.
//! - [`DwarfsBackend`]: the staging backend. Lets `dwarfsextract` write one
//!   matching entry into a private temporary directory and reads it back.
//!
//! Both implement [`ExtractionBackend`], and both present symlinks as their
//! target text so callers see one maybe-pointer, maybe-data [`Payload`].
//! [`BackendChain`] orders them by the detected format and falls through to
//! the next backend whenever one fails.

mod command;
mod dwarfs;
mod payload;
mod squashfs;
mod tools;

pub use command::{CommandRunner, DEFAULT_TIMEOUT};
pub use dwarfs::DwarfsBackend;
pub use payload::{POINTER_TEXT_LIMIT, Payload, pointer_target};
pub use squashfs::SquashfsBackend;
pub use tools::{DEFAULT_TOOLS_DIR, DWARFSCK, DWARFSEXTRACT, Toolbox, UNSQUASHFS};

use async_trait::async_trait;
use tracing::debug;

use crate::detect::DetectedFormat;
use crate::error::{Result, ThumbnailError};
use crate::path::EntryPath;

/// One strategy for reading entries out of the embedded filesystem.
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// The filesystem format this backend understands.
    fn format(&self) -> DetectedFormat;

    /// Tools this backend needs for extraction that could not be found.
    fn missing_tools(&self) -> Vec<&'static str>;

    fn is_available(&self) -> bool {
        self.missing_tools().is_empty()
    }

    /// Return the entry's bytes, or its link target if it is a symlink.
    async fn extract(&self, entry: &EntryPath) -> Result<Payload>;

    /// Return every path in the embedded filesystem.
    async fn list(&self) -> Result<Vec<EntryPath>>;
}

/// Backends tried in order until one succeeds.
pub struct BackendChain<'a> {
    format: DetectedFormat,
    backends: Vec<Box<dyn ExtractionBackend + 'a>>,
}

impl<'a> BackendChain<'a> {
    /// Order `backends` so those matching `format` come first.
    ///
    /// The others keep their relative order and are still tried: a wrong
    /// detection only costs a failed attempt.
    pub fn new(format: DetectedFormat, mut backends: Vec<Box<dyn ExtractionBackend + 'a>>) -> Self {
        backends.sort_by_key(|backend| backend.format() != format);
        Self { format, backends }
    }

    fn unavailable_error(&self) -> ThumbnailError {
        ThumbnailError::ToolUnavailable(self.missing_tools().join(", "))
    }
}

#[async_trait]
impl ExtractionBackend for BackendChain<'_> {
    fn name(&self) -> &'static str {
        "chain"
    }

    fn format(&self) -> DetectedFormat {
        self.format
    }

    fn missing_tools(&self) -> Vec<&'static str> {
        self.backends
            .iter()
            .flat_map(|backend| backend.missing_tools())
            .collect()
    }

    /// Available as long as any backend is.
    fn is_available(&self) -> bool {
        self.backends.iter().any(|backend| backend.is_available())
    }

    async fn extract(&self, entry: &EntryPath) -> Result<Payload> {
        let mut last_error = None;
        for backend in self.backends.iter().filter(|b| b.is_available()) {
            match backend.extract(entry).await {
                Ok(payload) => {
                    debug!("{} extracted '{entry}' ({} bytes)", backend.name(), payload.len());
                    return Ok(payload);
                }
                Err(e) => {
                    debug!("{} failed for '{entry}': {e}", backend.name());
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| self.unavailable_error()))
    }

    async fn list(&self) -> Result<Vec<EntryPath>> {
        let mut last_error = None;
        for backend in self.backends.iter().filter(|b| b.is_available()) {
            match backend.list().await {
                Ok(paths) => {
                    debug!("{} listed {} entries", backend.name(), paths.len());
                    return Ok(paths);
                }
                Err(e) => {
                    debug!("{} listing failed: {e}", backend.name());
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| self.unavailable_error()))
    }
}

/// Map a failed tool run to "entry not found", leaving timeouts and
/// empty-output failures as they are.
pub(crate) fn entry_error(error: ThumbnailError, entry: &EntryPath) -> ThumbnailError {
    match error {
        ThumbnailError::ExtractionFailed { .. } => ThumbnailError::EntryNotFound(entry.to_string()),
        other => other,
    }
}
