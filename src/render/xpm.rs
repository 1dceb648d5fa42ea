//! XPM3 decoding.
//!
//! Legacy `usr/share/pixmaps` icons are often XPM, which the `image`
//! decoders do not cover. An XPM3 file is C source: a header string
//! `"width height ncolors cpp"`, `ncolors` color definitions, then one
//! string per pixel row.

use image::{Rgba, RgbaImage};
use std::collections::HashMap;
use tracing::debug;

use crate::error::{Result, ThumbnailError};

/// Marker comment every XPM3 file starts with.
pub const MAGIC: &[u8] = b"/* XPM */";

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Largest width or height accepted.
const MAX_DIMENSION: u32 = 4096;

/// Visual keys in a color definition, in order of preference.
const CONTEXT_KEYS: [&str; 5] = ["c", "g", "g4", "m", "s"];

pub fn is_xpm(bytes: &[u8]) -> bool {
    bytes.trim_ascii_start().starts_with(MAGIC)
}

pub fn decode(bytes: &[u8]) -> Result<RgbaImage> {
    let text = std::str::from_utf8(bytes).map_err(|_| invalid("not UTF-8 text"))?;
    let mut strings = quoted_strings(text);

    let header = strings.next().ok_or_else(|| invalid("missing header"))?;
    let values: Vec<u32> = header
        .split_whitespace()
        .take(4)
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| invalid("malformed header"))?;
    let [width, height, ncolors, cpp] = values[..] else {
        return Err(invalid("malformed header"));
    };
    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(invalid("implausible dimensions"));
    }
    if cpp == 0 || cpp > 8 {
        return Err(invalid("implausible characters per pixel"));
    }
    let cpp = cpp as usize;

    let mut palette = HashMap::new();
    for _ in 0..ncolors {
        let line = strings.next().ok_or_else(|| invalid("truncated color table"))?;
        if line.len() < cpp || !line.is_char_boundary(cpp) {
            return Err(invalid("short color definition"));
        }
        let (key, definition) = line.split_at(cpp);
        palette.insert(key, color_for(definition)?);
    }

    let mut image = RgbaImage::new(width, height);
    for y in 0..height {
        let row = strings.next().ok_or_else(|| invalid("truncated pixel data"))?;
        let row = row.as_bytes();
        if row.len() < width as usize * cpp {
            return Err(invalid("short pixel row"));
        }
        for x in 0..width {
            let start = x as usize * cpp;
            let key = std::str::from_utf8(&row[start..start + cpp])
                .map_err(|_| invalid("non-ASCII pixel key"))?;
            let color = palette
                .get(key)
                .ok_or_else(|| invalid("pixel uses undefined color"))?;
            image.put_pixel(x, y, *color);
        }
    }

    debug!("decoded {width}x{height} XPM with {ncolors} colors");
    Ok(image)
}

/// Contents of each `"..."` literal outside comments, in order.
fn quoted_strings(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        loop {
            let quote = rest.find('"');
            let comment = rest.find("/*");
            match (quote, comment) {
                (Some(q), Some(c)) if c < q => {
                    let end = rest[c + 2..].find("*/")?;
                    rest = &rest[c + 2 + end + 2..];
                }
                (Some(q), _) => {
                    let body = &rest[q + 1..];
                    let end = body.find('"')?;
                    rest = &body[end + 1..];
                    return Some(&body[..end]);
                }
                (None, _) => return None,
            }
        }
    })
}

/// Pick the color for the most preferred visual key in `definition`.
///
/// `definition` is a sequence of `key color` pairs, where a color may span
/// several words (`c light gray`).
fn color_for(definition: &str) -> Result<Rgba<u8>> {
    let mut pairs: Vec<(&str, Vec<&str>)> = Vec::new();
    for word in definition.split_whitespace() {
        match pairs.last_mut() {
            Some((_, color)) if !CONTEXT_KEYS.contains(&word) || color.is_empty() => {
                color.push(word)
            }
            _ if CONTEXT_KEYS.contains(&word) => pairs.push((word, Vec::new())),
            _ => return Err(invalid("color definition without a key")),
        }
    }

    let (_, words) = CONTEXT_KEYS
        .iter()
        .filter(|key| **key != "s")
        .find_map(|key| pairs.iter().find(|(k, color)| k == key && !color.is_empty()))
        .ok_or_else(|| invalid("color definition without a color"))?;
    parse_color(&words.join(" "))
}

fn parse_color(value: &str) -> Result<Rgba<u8>> {
    if value.eq_ignore_ascii_case("none") {
        return Ok(TRANSPARENT);
    }
    if let Some(hex) = value.strip_prefix('#') {
        return parse_hex(hex).ok_or_else(|| invalid("malformed hex color"));
    }

    let name: String = value
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();
    let rgb = match name.as_str() {
        "black" => [0, 0, 0],
        "white" => [255, 255, 255],
        "red" => [255, 0, 0],
        "green" => [0, 255, 0],
        "blue" => [0, 0, 255],
        "yellow" => [255, 255, 0],
        "cyan" => [0, 255, 255],
        "magenta" => [255, 0, 255],
        "gray" | "grey" => [190, 190, 190],
        "lightgray" | "lightgrey" => [211, 211, 211],
        "darkgray" | "darkgrey" => [169, 169, 169],
        "orange" => [255, 165, 0],
        "brown" => [165, 42, 42],
        "purple" => [160, 32, 240],
        _ => {
            debug!("unknown XPM color name '{value}', using black");
            [0, 0, 0]
        }
    };
    Ok(Rgba([rgb[0], rgb[1], rgb[2], 255]))
}

/// `#RGB`, `#RRGGBB` or `#RRRRGGGGBBBB`; wider channels keep their high byte.
fn parse_hex(hex: &str) -> Option<Rgba<u8>> {
    if !hex.is_ascii() || hex.is_empty() || hex.len() % 3 != 0 {
        return None;
    }
    let width = hex.len() / 3;
    if width > 4 {
        return None;
    }
    let channel = |i: usize| -> Option<u8> {
        let digits = &hex[i * width..(i + 1) * width];
        let value = u16::from_str_radix(digits, 16).ok()?;
        Some(match width {
            1 => (value as u8) * 17,
            2 => value as u8,
            3 => (value >> 4) as u8,
            _ => (value >> 8) as u8,
        })
    };
    Some(Rgba([channel(0)?, channel(1)?, channel(2)?, 255]))
}

fn invalid(reason: &str) -> ThumbnailError {
    ThumbnailError::DecodeFailed(format!("invalid XPM: {reason}"))
}
