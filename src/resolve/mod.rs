//! Finding the icon inside the archive.
//!
//! Resolution runs in two stages against any [`ExtractionBackend`]:
//!
//! 1. Chase `.DirIcon`. It is usually a pointer (a symlink or a short text
//!    file naming another entry), so pointers are followed until real data
//!    turns up, at most [`MAX_POINTER_HOPS`] times and never through the
//!    same entry twice.
//! 2. If that fails, list the archive, read the first desktop entry's
//!    `Icon=` value and try the [`candidates`] derived from it.
//!
//! The first payload that renders wins.

mod desktop;

pub use desktop::{ICON_EXTENSIONS, ICON_ROOTS, candidates, icon_name, is_desktop_entry};

use std::collections::HashSet;
use tracing::{debug, info};

use crate::error::{Result, ThumbnailError};
use crate::extract::{ExtractionBackend, Payload};
use crate::path::EntryPath;
use crate::render::{self, Thumbnail};

/// Entry every AppImage is expected to carry at its root.
pub const DIR_ICON: &str = ".DirIcon";

/// Pointers followed from one starting entry before giving up.
pub const MAX_POINTER_HOPS: usize = 8;

pub struct IconResolver<'a> {
    source: &'a dyn ExtractionBackend,
    size: u32,
}

impl<'a> IconResolver<'a> {
    /// Resolve icons from `source`, rendering them at `size` pixels.
    pub fn new(source: &'a dyn ExtractionBackend, size: u32) -> Self {
        Self { source, size }
    }

    /// Find and render the archive's icon.
    ///
    /// # Returns
    ///
    /// The first thumbnail that renders. If `.DirIcon` is unusable and the
    /// desktop entry leads nowhere, [`ThumbnailError::NoIconFound`]; errors
    /// listing the archive are passed through.
    pub async fn resolve(&self) -> Result<Thumbnail> {
        let dir_icon = EntryPath::new(DIR_ICON).ok_or(ThumbnailError::NoIconFound)?;
        match self.render_entry(&dir_icon).await {
            Ok(thumbnail) => return Ok(thumbnail),
            Err(e) => info!("{DIR_ICON} unusable ({e}), falling back to desktop entry"),
        }

        self.resolve_from_desktop_entry().await
    }

    async fn resolve_from_desktop_entry(&self) -> Result<Thumbnail> {
        let listing = self.source.list().await?;
        let desktop = listing
            .iter()
            .find(|path| is_desktop_entry(path))
            .ok_or(ThumbnailError::NoIconFound)?;
        debug!("using desktop entry '{desktop}'");

        let (_, bytes) = self.chase(desktop).await?;
        let text = String::from_utf8_lossy(&bytes);
        let icon = icon_name(&text).ok_or(ThumbnailError::NoIconFound)?;
        debug!("desktop entry names icon '{icon}'");

        for candidate in candidates(icon, &listing) {
            match self.render_entry(&candidate).await {
                Ok(thumbnail) => return Ok(thumbnail),
                Err(e) => debug!("candidate '{candidate}' rejected: {e}"),
            }
        }
        Err(ThumbnailError::NoIconFound)
    }

    async fn render_entry(&self, entry: &EntryPath) -> Result<Thumbnail> {
        let (resolved, bytes) = self.chase(entry).await?;
        let thumbnail = render::render(&bytes, self.size)?;
        info!("rendered icon from '{resolved}'");
        Ok(thumbnail)
    }

    /// Follow pointers from `start` until an entry holds data.
    ///
    /// A target is looked up relative to the pointing entry's directory
    /// first. If no such entry exists, the same text is tried from the
    /// archive root.
    ///
    /// # Returns
    ///
    /// The entry the chain ended at and its bytes, or
    /// [`ThumbnailError::SymlinkLoopExceeded`] if the chain revisits an
    /// entry or needs more than [`MAX_POINTER_HOPS`] hops.
    pub async fn chase(&self, start: &EntryPath) -> Result<(EntryPath, Vec<u8>)> {
        let mut visited = HashSet::from([start.clone()]);
        let mut current = start.clone();
        let mut payload = self.source.extract(start).await?;

        for _ in 0..MAX_POINTER_HOPS {
            let target = match payload {
                Payload::Data(bytes) => return Ok((current, bytes)),
                Payload::Pointer(target) => target,
            };
            let (next, next_payload) = self.follow(start, &current, &target, &mut visited).await?;
            debug!("'{current}' points to '{next}'");
            current = next;
            payload = next_payload;
        }

        match payload {
            Payload::Data(bytes) => Ok((current, bytes)),
            Payload::Pointer(_) => Err(loop_exceeded(start)),
        }
    }

    async fn follow(
        &self,
        start: &EntryPath,
        from: &EntryPath,
        target: &str,
        visited: &mut HashSet<EntryPath>,
    ) -> Result<(EntryPath, Payload)> {
        let relative = from
            .resolve_pointer(target)
            .ok_or_else(|| ThumbnailError::EntryNotFound(target.to_string()))?;
        let not_found = match self.visit(start, &relative, visited).await {
            Err(ThumbnailError::EntryNotFound(entry)) => ThumbnailError::EntryNotFound(entry),
            other => return other.map(|payload| (relative, payload)),
        };

        match EntryPath::new(target.trim()) {
            Some(rooted) if rooted != relative => {
                debug!("'{relative}' not found, trying '{rooted}' from the archive root");
                let payload = self.visit(start, &rooted, visited).await?;
                Ok((rooted, payload))
            }
            _ => Err(not_found),
        }
    }

    async fn visit(
        &self,
        start: &EntryPath,
        entry: &EntryPath,
        visited: &mut HashSet<EntryPath>,
    ) -> Result<Payload> {
        if !visited.insert(entry.clone()) {
            debug!("pointer cycle through '{entry}'");
            return Err(loop_exceeded(start));
        }
        self.source.extract(entry).await
    }
}

fn loop_exceeded(start: &EntryPath) -> ThumbnailError {
    ThumbnailError::SymlinkLoopExceeded(start.to_string(), MAX_POINTER_HOPS)
}
