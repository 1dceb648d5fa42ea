//! Archive-relative entry paths.
//!
//! Paths reach the resolver from two untrusted places: external tool
//! listings and pointer text stored inside the archive. Both are funnelled
//! through [`EntryPath::new`] so that the rest of the crate only ever sees
//! one canonical spelling per entry.

use std::fmt;

/// A normalized, archive-relative path.
///
/// Invariants: no leading slash, no empty segments, no `.` segments, and
/// no `..` segments (they are resolved lexically and clamp at the root).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryPath(String);

impl EntryPath {
    /// Normalize `raw` into an entry path.
    ///
    /// Returns `None` when nothing is left after normalization (the archive
    /// root itself is not an entry).
    pub fn new(raw: &str) -> Option<Self> {
        let mut segments: Vec<&str> = Vec::new();
        push_segments(&mut segments, raw);
        Self::from_segments(&segments)
    }

    /// Resolve pointer text found inside this entry.
    ///
    /// Relative targets are taken relative to this entry's directory, the
    /// same way a symlink target is; a leading `/` means the archive root.
    pub fn resolve_pointer(&self, target: &str) -> Option<Self> {
        let target = target.trim();
        let mut segments: Vec<&str> = Vec::new();
        if !target.starts_with('/') {
            if let Some(parent) = self.parent() {
                segments.extend(parent.split('/'));
            }
        }
        push_segments(&mut segments, target);
        Self::from_segments(&segments)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Everything before the last segment, if any.
    pub fn parent(&self) -> Option<&str> {
        self.0.rsplit_once('/').map(|(parent, _)| parent)
    }

    /// Segment-aware prefix test: `usr/share/icons` contains
    /// `usr/share/icons/a.png` but not `usr/share/icons-extra/a.png`.
    pub fn is_under(&self, root: &str) -> bool {
        let root = root.trim_matches('/');
        match self.0.strip_prefix(root) {
            Some(rest) => rest.starts_with('/'),
            None => false,
        }
    }

    fn from_segments(segments: &[&str]) -> Option<Self> {
        if segments.is_empty() {
            None
        } else {
            Some(Self(segments.join("/")))
        }
    }
}

fn push_segments<'a>(segments: &mut Vec<&'a str>, raw: &'a str) {
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
}

impl fmt::Display for EntryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EntryPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
