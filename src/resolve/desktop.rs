//! Desktop-entry parsing and icon-name candidate generation.

use crate::path::EntryPath;

/// Conventional icon directories, searched in this order.
pub const ICON_ROOTS: [&str; 3] = [".local/share/icons", "usr/share/icons", "usr/share/pixmaps"];

/// Extensions tried for a bare icon name, in this order.
pub const ICON_EXTENSIONS: [&str; 3] = ["svg", "png", "xpm"];

/// Extensions stripped from an `Icon=` value before retrying with
/// [`ICON_EXTENSIONS`]. Anything else after a dot is part of the name
/// (`org.example.App`).
const IMAGE_EXTENSIONS: [&str; 10] = [
    "svg", "svgz", "png", "xpm", "jpg", "jpeg", "gif", "bmp", "ico", "webp",
];

/// Whether `path` names a desktop entry.
pub fn is_desktop_entry(path: &EntryPath) -> bool {
    let name = path.file_name();
    name.len() > ".desktop".len()
        && name
            .get(name.len() - ".desktop".len()..)
            .is_some_and(|suffix| suffix.eq_ignore_ascii_case(".desktop"))
}

/// Value of the first `Icon=` key in a desktop entry.
///
/// Blank lines and `#` comments are skipped; the key is matched
/// case-insensitively and the value is trimmed.
pub fn icon_name(text: &str) -> Option<&str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("Icon"))
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

/// Split a recognised image extension off `name`.
fn split_image_extension(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && !stem.ends_with('/')
                && IMAGE_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext)) =>
        {
            (stem, Some(ext))
        }
        _ => (name, None),
    }
}

/// Every entry worth trying for `icon`, best first and without repeats.
///
/// 1. `icon` itself as a path.
/// 2. `icon` without its image extension, with each of [`ICON_EXTENSIONS`].
/// 3. Entries in `listing` under each of [`ICON_ROOTS`] whose file name is
///    the icon's base name plus one of [`ICON_EXTENSIONS`], compared
///    case-insensitively.
pub fn candidates(icon: &str, listing: &[EntryPath]) -> Vec<EntryPath> {
    let mut found: Vec<EntryPath> = Vec::new();
    let mut push = |path: Option<EntryPath>| {
        if let Some(path) = path {
            if !found.contains(&path) {
                found.push(path);
            }
        }
    };

    push(EntryPath::new(icon));

    let (stem, _) = split_image_extension(icon);
    for ext in ICON_EXTENSIONS {
        push(EntryPath::new(&format!("{stem}.{ext}")));
    }

    let base = stem.rsplit('/').next().unwrap_or(stem);
    if !base.is_empty() {
        for root in ICON_ROOTS {
            for entry in listing.iter().filter(|entry| entry.is_under(root)) {
                let (entry_stem, entry_ext) = split_image_extension(entry.file_name());
                let matches = entry_stem.eq_ignore_ascii_case(base)
                    && entry_ext.is_some_and(|ext| {
                        ICON_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext))
                    });
                if matches {
                    push(Some(entry.clone()));
                }
            }
        }
    }

    found
}
