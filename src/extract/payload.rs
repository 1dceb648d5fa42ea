//! Pointer-versus-data classification of extracted bytes.
//!
//! AppImage tooling often stores `.DirIcon` as a short text file naming the
//! real icon instead of a symlink, and the staging backend surfaces real
//! symlinks as their target text. Both arrive here as plain bytes. The
//! classifier is a heuristic: any short, printable, path-shaped byte string
//! is treated as a pointer, even if it was meant as data.

/// Longest byte string that may still be read as pointer text.
pub const POINTER_TEXT_LIMIT: usize = 1024;

/// Bytes returned for one archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Candidate image data (or any other file content).
    Data(Vec<u8>),
    /// Trimmed text naming another entry.
    Pointer(String),
}

impl Payload {
    /// Classify raw entry bytes.
    pub fn classify(bytes: Vec<u8>) -> Self {
        match pointer_target(&bytes) {
            Some(target) => Payload::Pointer(target.to_string()),
            None => Payload::Data(bytes),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Payload::Data(bytes) => bytes.len(),
            Payload::Pointer(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Return the trimmed pointer target if `bytes` looks like one.
///
/// Requirements: 1..=[`POINTER_TEXT_LIMIT`] bytes, no NUL, every byte ASCII
/// printable or whitespace, non-empty after trimming, and only
/// `[A-Za-z0-9/._-]` after trimming.
pub fn pointer_target(bytes: &[u8]) -> Option<&str> {
    if bytes.is_empty() || bytes.len() > POINTER_TEXT_LIMIT {
        return None;
    }
    if !bytes
        .iter()
        .all(|&b| b.is_ascii_graphic() || b.is_ascii_whitespace())
    {
        return None;
    }

    // all bytes are ASCII at this point
    let text = std::str::from_utf8(bytes).ok()?.trim();
    if text.is_empty() {
        return None;
    }
    text.bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'/' | b'.' | b'-' | b'_'))
        .then_some(text)
}
