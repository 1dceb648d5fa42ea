use thiserror::Error;

/// Every way thumbnail generation can fail.
///
/// Most variants are recovered locally by the caller (the next backend, the
/// next candidate path, the desktop-entry fallback). Only when every
/// fallback is exhausted does one of them reach the binary.
#[derive(Debug, Error)]
pub enum ThumbnailError {
    /// The file header could not be parsed as an ELF image.
    #[error("not an AppImage: {0}")]
    NotAnArchive(String),

    /// No known filesystem magic at the payload offset.
    #[error("embedded filesystem format could not be determined")]
    FormatUndetermined,

    /// One or more external tools could not be found.
    #[error("required tool not available: {0}")]
    ToolUnavailable(String),

    /// The tool ran but the entry does not exist in the archive.
    #[error("entry '{0}' not found in archive")]
    EntryNotFound(String),

    /// The tool exited unsuccessfully.
    #[error("{tool} failed: {reason}")]
    ExtractionFailed { tool: String, reason: String },

    /// The tool did not finish within the configured wall-clock limit.
    #[error("{tool} timed out after {seconds}s")]
    ToolTimedOut { tool: String, seconds: u64 },

    /// The tool reported success but produced nothing.
    #[error("{0} produced no output")]
    EmptyPayload(String),

    /// A pointer chain was cyclic or longer than the hop limit.
    #[error("pointer chain starting at '{0}' exceeded {1} hops")]
    SymlinkLoopExceeded(String, usize),

    /// Every resolution strategy was exhausted.
    #[error("no usable icon found in AppImage")]
    NoIconFound,

    /// Image parsing, rendering or PNG encoding failed.
    #[error("failed to decode icon: {0}")]
    DecodeFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ThumbnailError>;
