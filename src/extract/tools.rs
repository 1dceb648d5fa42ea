//! Discovery of the external extraction tools.
//!
//! Lookups are made at most once per tool and cached in the [`Toolbox`],
//! which `main` builds once and lends to every backend.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

/// Where packaged builds install their private copies of the tools.
pub const DEFAULT_TOOLS_DIR: &str = "/usr/lib/appimage-thumbnailer";

pub const UNSQUASHFS: &str = "unsquashfs";
pub const DWARFSEXTRACT: &str = "dwarfsextract";
pub const DWARFSCK: &str = "dwarfsck";

/// Lazily-resolved paths of the external tools.
#[derive(Debug)]
pub struct Toolbox {
    search_dirs: Vec<PathBuf>,
    search_path: bool,
    unsquashfs: OnceLock<Option<PathBuf>>,
    dwarfsextract: OnceLock<Option<PathBuf>>,
    dwarfsck: OnceLock<Option<PathBuf>>,
}

impl Toolbox {
    /// Search `tools_dir`, then the directory of the running executable and
    /// its parent, then `PATH`.
    pub fn new(tools_dir: &Path) -> Self {
        let mut search_dirs = vec![tools_dir.to_path_buf()];
        if let Some(exe_dir) = env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            let parent = exe_dir.join("..");
            search_dirs.push(exe_dir);
            search_dirs.push(parent);
        }
        Self::with_search_dirs(search_dirs, true)
    }

    /// Search only the given directories, in order, optionally followed by
    /// `PATH`.
    pub fn with_search_dirs(search_dirs: Vec<PathBuf>, search_path: bool) -> Self {
        Self {
            search_dirs,
            search_path,
            unsquashfs: OnceLock::new(),
            dwarfsextract: OnceLock::new(),
            dwarfsck: OnceLock::new(),
        }
    }

    pub fn unsquashfs(&self) -> Option<&Path> {
        self.cached(&self.unsquashfs, UNSQUASHFS)
    }

    pub fn dwarfsextract(&self) -> Option<&Path> {
        self.cached(&self.dwarfsextract, DWARFSEXTRACT)
    }

    pub fn dwarfsck(&self) -> Option<&Path> {
        self.cached(&self.dwarfsck, DWARFSCK)
    }

    fn cached<'a>(&self, slot: &'a OnceLock<Option<PathBuf>>, name: &str) -> Option<&'a Path> {
        slot.get_or_init(|| {
            let found = self.find(name);
            match &found {
                Some(path) => debug!("found {name} at {}", path.display()),
                None => debug!("{name} not found"),
            }
            found
        })
        .as_deref()
    }

    fn find(&self, name: &str) -> Option<PathBuf> {
        let path_dirs = if self.search_path {
            env::var_os("PATH")
                .map(|paths| env::split_paths(&paths).collect())
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        self.search_dirs
            .iter()
            .chain(path_dirs.iter())
            .map(|dir| dir.join(name))
            .find(|candidate| is_executable(candidate))
    }
}

fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = path.metadata() else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }

    #[cfg(not(unix))]
    {
        true
    }
}
